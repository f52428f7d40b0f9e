use super::helpers::{Fixture, SlowExport, fast_config};
use nexar_ipc::{ExchangeSession, Outcome, Topology};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_tears_down_both_participants() {
    let fx = Fixture::new();
    let slow = Arc::new(SlowExport {
        inner: fx.provider.clone(),
        delay: Duration::from_millis(100),
    });
    let session = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        slow,
        fast_config(8),
    );
    let canceller = session.canceller();
    let running = tokio::spawn(session.run());

    tokio::time::sleep(Duration::from_millis(10)).await;
    canceller.cancel();
    assert!(canceller.is_cancelled());

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_before_run() {
    let fx = Fixture::new();
    let session = ExchangeSession::new(
        Topology::BareMetal.capabilities(),
        fx.channel.clone(),
        fx.provider.clone(),
        fast_config(8),
    );
    session.canceller().cancel();
    assert_eq!(session.run().await, Outcome::Cancelled);
}
