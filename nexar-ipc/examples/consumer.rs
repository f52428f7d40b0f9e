//! Consumer half of a cross-process handle exchange.
//!
//! Reads the capability flags of the environment it runs in (see
//! `CapabilitySet::from_env`), waits for the producer's readiness latch, maps
//! the handle and verifies the pattern. Exits non-zero unless verified.
//!
//! It may start before the producer: records left in the directory by a
//! finished exchange are skipped until the producer clears them and
//! publishes a new handle.
//!
//! ```bash
//! NEXAR_IPC_SHARED_PID_NS=1 NEXAR_IPC_PRIVILEGED=1 \
//!     cargo run --example consumer -- /dev/shm/nexar-ipc-demo
//! ```

use nexar_ipc::{
    CapabilitySet, Consumer, FileChannel, GpuIpcProvider, IpcConfig, Outcome, TracingSink,
    device::HostIpcProvider,
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
    let caps = CapabilitySet::from_env();
    println!("consumer pid {} with {caps}", std::process::id());

    let channel = Arc::new(FileChannel::open(&dir, config.poll_interval)?);
    let consumer = Consumer::new(provider(&config)?, channel, &caps, &config)
        .with_event_sink(Arc::new(TracingSink));
    println!("verdict: {}", consumer.verdict());

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = Outcome::from(consumer.run(cancel_rx).await);
    println!("consumer finished: {outcome}");
    if !outcome.is_verified() {
        std::process::exit(1);
    }
    Ok(())
}
