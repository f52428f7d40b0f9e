//! Producer half of a cross-process handle exchange.
//!
//! Allocates device memory, fills it with the test pattern, publishes the IPC
//! handle into a channel directory and keeps the allocation alive until the
//! consumer reports (or Ctrl-C). Start this first, then `consumer` in another
//! process, container or pod that mounts the same directory.
//!
//! ```bash
//! cargo run --example producer -- /dev/shm/nexar-ipc-demo
//! cargo run --example producer --features cuda -- /dev/shm/nexar-ipc-demo
//! ```

use nexar_ipc::{
    FileChannel, GpuIpcProvider, IpcConfig, Producer, TracingSink, device::HostIpcProvider,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn provider(config: &IpcConfig) -> nexar_ipc::Result<Arc<dyn GpuIpcProvider>> {
    #[cfg(feature = "cuda")]
    {
        Ok(Arc::new(nexar_ipc::CudaIpcProvider::new(config.device)?))
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = config;
        Ok(Arc::new(HostIpcProvider::new(HostIpcProvider::DEFAULT_ROOT)?))
    }
}

#[tokio::main]
async fn main() -> nexar_ipc::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/shm/nexar-ipc-demo".into());
    let config = IpcConfig::from_env();

    let mut channel = FileChannel::open(&dir, config.poll_interval)?;
    // The producer owns the directory's lifecycle; drop stale records first.
    channel.clear()?;

    let producer = Producer::new(provider(&config)?, Arc::new(channel), &config)
        .with_event_sink(Arc::new(TracingSink));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    println!("producer pid {} publishing into {dir}", std::process::id());
    let terminal = producer.run(cancel_rx).await;
    println!("producer finished: {terminal:?}");
    Ok(())
}
