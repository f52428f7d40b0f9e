//! Run a full exchange in one process for a named deployment topology.
//!
//! ```bash
//! cargo run --example session -- dra-broker
//! cargo run --example session -- two-pods
//! ```

use nexar_ipc::{
    ExchangeSession, FileChannel, HostIpcProvider, IpcConfig, Topology, TracingSink,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> nexar_ipc::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "bare-metal".into());
    let Some(topology) = Topology::from_name(&name) else {
        eprintln!("unknown topology {name}; choose one of:");
        for t in Topology::all() {
            eprintln!("  {:<36} {}", t.name(), t.description());
        }
        std::process::exit(2);
    };

    let config = IpcConfig::from_env();
    let scratch = std::env::temp_dir().join(format!("nexar-ipc-session-{}", std::process::id()));
    let mut channel = FileChannel::open(scratch.join("channel"), config.poll_interval)?;
    channel.clear()?;
    let provider = Arc::new(HostIpcProvider::new(scratch.join("devices"))?);

    let outcome = ExchangeSession::new(
        topology.capabilities(),
        Arc::new(channel),
        provider,
        config,
    )
    .with_event_sink(Arc::new(TracingSink))
    .run()
    .await;

    println!("{topology} ({}): {outcome}", topology.capabilities());
    std::fs::remove_dir_all(&scratch)?;
    Ok(())
}
