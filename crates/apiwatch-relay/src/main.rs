//! apiwatch relay server
//!
//! Reads one upstream SSE log stream and fans it out to every `/logs` client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use apiwatch_core::config::load_config;
use apiwatch_core::tracing_init::init_tracing_for;
use apiwatch_relay::server::{AppState, RelaySlot, build_router};

#[derive(Parser, Debug)]
#[command(name = "apiwatch-relay")]
#[command(version, about = "apiwatch relay - fans one SSE log stream out to many clients")]
struct Args {
    /// Path to a JSON settings file. Defaults to the global settings file if present.
    #[arg(long, env = "APIWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Producer SSE endpoint to relay.
    #[arg(long)]
    upstream_url: Option<String>,

    /// Per-subscriber outbound queue capacity, in frames.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Upstream connect timeout in seconds.
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.relay.listen_addr = addr;
    }
    if let Some(url) = args.upstream_url {
        config.relay.upstream_url = url;
    }
    if let Some(capacity) = args.queue_capacity {
        config.relay.queue_capacity = capacity;
    }
    if let Some(secs) = args.connect_timeout_secs {
        config.relay.connect_timeout_secs = secs;
    }
    config.relay.validate()?;

    init_tracing_for(&["apiwatch_relay", "apiwatch_core"], &config.log_level, args.log_json)?;

    let addr = config.relay.listen_addr;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        upstream = %config.relay.upstream_url,
        "Starting apiwatch-relay"
    );

    let slot = Arc::new(RelaySlot::new(config.relay));
    if let Err(e) = slot.open().await {
        warn!(error = %e, "Upstream not available yet, will retry when a client connects");
    }

    let app = build_router(AppState {
        relays: Arc::clone(&slot),
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
            slot.shutdown().await;
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
