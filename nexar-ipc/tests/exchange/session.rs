use super::helpers::{Corrupting, Fixture, NoWrite, SlowExport, fast_config};
use nexar_ipc::{
    CapabilitySet, ConsumerReport, DeviceErrorKind, ExchangeChannel, ExchangeSession,
    FailureReason, IpcConfig, Outcome, ProtocolViolation, Topology,
};
use std::sync::Arc;
use std::time::Duration;

/// pid + privileged on one host: pattern [1; N] sums to N.
#[tokio::test]
async fn test_bare_metal_verified() {
    let fx = Fixture::new();
    let n = 256;
    let caps = CapabilitySet::isolated()
        .with_pid_visibility_shared(true)
        .with_privileged(true);

    let session =
        ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(n));
    let outcome = session.run().await;

    assert_eq!(outcome, Outcome::Verified { checksum: n as u64 });
    assert_eq!(
        fx.channel.read_report().unwrap(),
        Some(ConsumerReport::Verified { checksum: n as u64 })
    );
    // Producer allocation freed after the report; consumer mapping closed.
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}

/// Broker-mediated access succeeds without privilege.
#[tokio::test]
async fn test_dra_broker_verified() {
    let fx = Fixture::new();
    let caps = CapabilitySet::new(false, true, false, true);
    let session =
        ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(64));
    let outcome = session.run().await;
    assert_eq!(outcome, Outcome::Verified { checksum: 64 });
}

#[tokio::test]
async fn test_separate_providers_and_channel_views() {
    let fx = Fixture::new();
    let producer_side = fx.provider.clone();
    let consumer_side = fx.second_provider();

    let session = ExchangeSession::new(
        Topology::TwoPodsHostPid.capabilities(),
        fx.channel.clone(),
        producer_side.clone(),
        fast_config(32),
    )
    .with_consumer_provider(consumer_side.clone());
    assert_eq!(session.run().await, Outcome::Verified { checksum: 32 });

    assert_eq!(
        fx.reopen_channel().read_report().unwrap(),
        Some(ConsumerReport::Verified { checksum: 32 })
    );
    assert_eq!(producer_side.live_regions().unwrap(), 0);
    assert_eq!(consumer_side.live_regions().unwrap(), 0);
}

#[tokio::test]
async fn test_corrupted_pattern_is_data_mismatch() {
    let fx = Fixture::new();
    let corrupting = Arc::new(Corrupting {
        inner: fx.provider.clone(),
    });
    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        corrupting,
        fast_config(10),
    )
    .run()
    .await;
    assert_eq!(
        outcome,
        Outcome::DataMismatch {
            expected: 10,
            actual: 9
        }
    );
}

/// The consumer gives up waiting for readiness before the producer
/// publishes; the producer is released by the consumer's report.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_ready_timeout() {
    let fx = Fixture::new();
    let slow = Arc::new(SlowExport {
        inner: fx.provider.clone(),
        delay: Duration::from_millis(100),
    });
    let mut config = fast_config(8);
    config.ready_timeout = Duration::from_millis(1);

    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        slow,
        config,
    )
    .run()
    .await;

    assert_eq!(outcome, Outcome::Timeout);
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}

/// The whole session runs past its deadline.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_deadline() {
    let fx = Fixture::new();
    let slow = Arc::new(SlowExport {
        inner: fx.provider.clone(),
        delay: Duration::from_millis(200),
    });

    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        slow,
        fast_config(8),
    )
    .with_timeout(Duration::from_millis(20))
    .run()
    .await;

    assert_eq!(outcome, Outcome::Timeout);
    // Both participants unwound during teardown.
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}

#[tokio::test]
async fn test_reused_channel_fails_with_protocol_error() {
    let fx = Fixture::new();
    let caps = Topology::BareMetal.capabilities();
    let first = ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(8));
    assert!(first.run().await.is_verified());

    let second = ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(8))
        .with_timeout(Duration::from_secs(5))
        .run()
        .await;
    assert_eq!(
        second,
        Outcome::Failed(FailureReason::Protocol(ProtocolViolation::StaleExchange))
    );
}

/// Memory that was never written must not verify, whatever the configured
/// pattern value.
#[tokio::test]
async fn test_unwritten_memory_never_verifies() {
    let fx = Fixture::new();
    let no_write = Arc::new(NoWrite {
        inner: fx.provider.clone(),
    });
    let zero_value = IpcConfig {
        pattern_value: 0,
        ..fast_config(16)
    };
    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        no_write.clone(),
        zero_value,
    )
    .run()
    .await;
    assert_eq!(
        outcome,
        Outcome::Failed(FailureReason::Device(DeviceErrorKind::InvalidArgument))
    );

    let fx = Fixture::new();
    let no_write = Arc::new(NoWrite {
        inner: fx.provider.clone(),
    });
    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        no_write,
        fast_config(16),
    )
    .run()
    .await;
    assert_eq!(
        outcome,
        Outcome::DataMismatch {
            expected: 16,
            actual: 0
        }
    );
}

/// A pattern whose byte size overflows fails cleanly instead of panicking
/// inside the producer task.
#[tokio::test]
async fn test_oversized_pattern_fails_cleanly() {
    let fx = Fixture::new();
    let outcome = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        fx.provider.clone(),
        fast_config(usize::MAX / 2),
    )
    .run()
    .await;
    assert_eq!(
        outcome,
        Outcome::Failed(FailureReason::Device(DeviceErrorKind::InvalidArgument))
    );
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}
