use super::helpers::{CountingChannel, Fixture, fast_config};
use nexar_ipc::channel::ChannelState;
use nexar_ipc::oracle::Verdict;
use nexar_ipc::{
    Consumer, ConsumerReport, ExchangeChannel, ExchangeSession, FailureReason, FileChannel,
    IpcError, OwnedAllocation, Producer, ProtocolViolation, Terminal, TestPattern, Topology,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[test]
fn test_read_before_publish_is_named_error() {
    let fx = Fixture::new();
    let err = fx.channel.read_handle().unwrap_err();
    assert!(matches!(
        err,
        IpcError::Protocol(ProtocolViolation::NotPublished)
    ));
}

#[test]
fn test_signal_before_publish_rejected() {
    let fx = Fixture::new();
    let err = fx.channel.signal_ready().unwrap_err();
    assert!(matches!(
        err,
        IpcError::Protocol(ProtocolViolation::NotPublished)
    ));
    assert_eq!(fx.channel.state().unwrap(), ChannelState::Empty);
}

#[test]
fn test_publication_visible_through_second_view() {
    let fx = Fixture::new();
    let alloc = OwnedAllocation::allocate(fx.provider.clone(), 16, 0).unwrap();
    let handle = alloc.export().unwrap();
    fx.channel.publish(&handle).unwrap();

    let other = fx.reopen_channel();
    assert_eq!(other.state().unwrap(), ChannelState::Published);
    assert_eq!(other.read_handle().unwrap(), handle);
    assert!(matches!(
        other.publish(&handle).unwrap_err(),
        IpcError::Protocol(ProtocolViolation::AlreadyPublished)
    ));
}

/// Published but never signaled: the consumer times out and the channel
/// shows published-but-unsignaled.
#[tokio::test]
async fn test_unsignaled_handle_times_out() {
    let fx = Fixture::new();
    let pattern = TestPattern::ones(8);
    let size = pattern.size_bytes().unwrap();
    let alloc = OwnedAllocation::allocate(fx.provider.clone(), size, 0).unwrap();
    alloc.write(0, &pattern.to_bytes()).unwrap();
    fx.channel.publish(&alloc.export().unwrap()).unwrap();

    let mut config = fast_config(8);
    config.ready_timeout = Duration::from_millis(1);
    let consumer = Consumer::with_verdict(
        fx.second_provider(),
        fx.reopen_channel(),
        Verdict::Allow,
        &config,
    );
    let (_tx, rx) = watch::channel(false);
    assert_eq!(
        consumer.run(rx).await,
        Terminal::Failed(FailureReason::Timeout)
    );
    assert_eq!(fx.channel.state().unwrap(), ChannelState::Published);
}

/// A consumer opened on a directory that still holds a finished exchange
/// must not map the old handle.
#[tokio::test]
async fn test_finished_exchange_not_consumed_by_late_consumer() {
    let fx = Fixture::new();
    let caps = Topology::BareMetal.capabilities();
    let session =
        ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(8));
    assert!(session.run().await.is_verified());

    let late = fx.reopen_channel();
    assert_eq!(late.state().unwrap(), ChannelState::Stale);
    let counting = Arc::new(CountingChannel::new(late));
    let mut config = fast_config(8);
    config.ready_timeout = Duration::from_millis(20);
    let consumer = Consumer::with_verdict(
        fx.second_provider(),
        counting.clone(),
        Verdict::Allow,
        &config,
    );
    let (_tx, rx) = watch::channel(false);
    assert_eq!(
        consumer.run(rx).await,
        Terminal::Failed(FailureReason::Protocol(ProtocolViolation::StaleExchange))
    );
    assert_eq!(counting.reads(), 0);
    assert_eq!(
        fx.channel.read_report().unwrap(),
        Some(ConsumerReport::Verified { checksum: 8 })
    );
}

/// Cross-process order: the consumer starts against a leftover directory,
/// then the producer clears it and runs a fresh exchange.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_started_before_producer_clears() {
    let fx = Fixture::new();
    let caps = Topology::BareMetal.capabilities();
    let first =
        ExchangeSession::new(caps, fx.channel.clone(), fx.provider.clone(), fast_config(8));
    assert!(first.run().await.is_verified());

    let consumer = Consumer::with_verdict(
        fx.second_provider(),
        fx.reopen_channel(),
        Verdict::Allow,
        &fast_config(16),
    );
    let (_ctx, crx) = watch::channel(false);
    let consumer = tokio::spawn(consumer.run(crx));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut producer_view =
        FileChannel::open(fx.dir.path().join("channel"), Duration::from_millis(1)).unwrap();
    producer_view.clear().unwrap();
    let producer = Producer::new(fx.provider.clone(), Arc::new(producer_view), &fast_config(16));
    let (_ptx, prx) = watch::channel(false);
    let producer = tokio::spawn(producer.run(prx));

    let consumer = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    let producer = tokio::time::timeout(Duration::from_secs(5), producer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consumer, Terminal::Verified { checksum: 16 });
    assert_eq!(producer, Terminal::Verified { checksum: 16 });
    assert_eq!(fx.provider.live_regions().unwrap(), 0);
}
