use super::helpers::{Fixture, Recorder, fast_config};
use nexar_ipc::oracle::{DenyReason, Verdict};
use nexar_ipc::{ExchangeEvent, ExchangeSession, Outcome, Role, Topology};
use std::sync::Arc;

#[tokio::test]
async fn test_successful_session_emits_every_milestone() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let outcome = ExchangeSession::new(
        Topology::DraBroker.capabilities(),
        fx.channel.clone(),
        fx.provider.clone(),
        fast_config(4),
    )
    .with_event_sink(recorder.clone())
    .run()
    .await;
    assert!(outcome.is_verified());

    let events = recorder.events();
    assert_eq!(
        events.first(),
        Some(&ExchangeEvent::VerdictComputed {
            verdict: Verdict::Allow
        })
    );
    assert_eq!(
        events.last(),
        Some(&ExchangeEvent::Outcome {
            role: None,
            outcome
        })
    );
    assert!(events.contains(&ExchangeEvent::HandlePublished {
        device: 0,
        size_bytes: 16
    }));
    assert!(events.contains(&ExchangeEvent::ReadySignaled));
    for role in [Role::Producer, Role::Consumer] {
        assert!(events.contains(&ExchangeEvent::Outcome {
            role: Some(role),
            outcome
        }));
    }
}

#[tokio::test]
async fn test_denied_session_reports_verdict_and_outcome() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let outcome = ExchangeSession::new(
        Topology::TwoPods.capabilities(),
        fx.channel.clone(),
        fx.provider.clone(),
        fast_config(4),
    )
    .with_event_sink(recorder.clone())
    .run()
    .await;

    let denied = Outcome::AuthorizationDenied(DenyReason::NoProcessVisibility);
    assert_eq!(outcome, denied);
    let events = recorder.events();
    assert_eq!(
        events[0],
        ExchangeEvent::VerdictComputed {
            verdict: Verdict::Deny(DenyReason::NoProcessVisibility)
        }
    );
    assert!(events.contains(&ExchangeEvent::Outcome {
        role: Some(Role::Consumer),
        outcome: denied
    }));
}
