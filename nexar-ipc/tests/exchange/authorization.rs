use super::helpers::{CountingChannel, Fixture, fast_config};
use nexar_ipc::oracle::{self, DenyReason, Verdict};
use nexar_ipc::{
    CapabilitySet, ConsumerReport, ExchangeChannel, ExchangeSession, FailureReason, Outcome,
    Topology,
};
use std::sync::Arc;

/// Without process visibility the consumer is refused before it ever reads
/// the handle, even with privilege.
#[tokio::test]
async fn test_no_pid_visibility_never_reads_handle() {
    let fx = Fixture::new();
    let counting = Arc::new(CountingChannel::new(fx.channel.clone()));
    let caps = CapabilitySet::new(true, false, true, false);

    let outcome = ExchangeSession::new(caps, counting.clone(), fx.provider.clone(), fast_config(16))
        .run()
        .await;

    assert_eq!(
        outcome,
        Outcome::AuthorizationDenied(DenyReason::NoProcessVisibility)
    );
    assert_eq!(counting.reads(), 0);
    assert_eq!(
        fx.channel.read_report().unwrap(),
        Some(ConsumerReport::Failed {
            reason: FailureReason::AuthorizationDenied(DenyReason::NoProcessVisibility)
        })
    );
    // The denial report also ended the producer's keep-alive.
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}

#[tokio::test]
async fn test_unprivileged_without_broker_denied() {
    let fx = Fixture::new();
    let outcome = ExchangeSession::new(
        Topology::SinglePodSharedPidUnprivileged.capabilities(),
        fx.channel.clone(),
        fx.provider.clone(),
        fast_config(16),
    )
    .run()
    .await;
    assert_eq!(
        outcome,
        Outcome::AuthorizationDenied(DenyReason::NoPrivilegeAndNoBroker)
    );
}

/// Every point of the capability space ends where the oracle says.
#[tokio::test]
async fn test_every_capability_set_matches_oracle() {
    for caps in CapabilitySet::all() {
        let fx = Fixture::new();
        let session =
            ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(8));
        let outcome = session.run().await;
        let expected = match oracle::evaluate(&caps) {
            Verdict::Allow => Outcome::Verified { checksum: 8 },
            Verdict::Deny(reason) => Outcome::AuthorizationDenied(reason),
        };
        assert_eq!(outcome, expected, "caps: {caps}");
    }
}

#[test]
fn test_ipc_namespace_flag_is_irrelevant() {
    for caps in CapabilitySet::all() {
        let flipped = caps.with_ipc_namespace_shared(!caps.ipc_namespace_shared());
        assert_eq!(oracle::evaluate(&caps), oracle::evaluate(&flipped));
    }
}

#[test]
fn test_truth_table_has_six_allowed_rows() {
    let table = oracle::truth_table();
    assert_eq!(table.len(), 16);
    assert_eq!(table.iter().filter(|(_, v)| v.is_allowed()).count(), 6);
}
