use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use apiwatch_core::tracing_init::init_tracing_for;
use apiwatch_producer::routes::{AppState, build_router};
use apiwatch_producer::simulate::Simulator;

#[derive(Parser)]
#[command(name = "apiwatch-producer")]
#[command(version, about = "Simulated request telemetry served as an SSE stream")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:5000", env = "LISTEN_ADDR")]
    addr: SocketAddr,

    /// Milliseconds between two events on `/logs`
    #[arg(long, default_value_t = 2000, env = "APIWATCH_PRODUCER_INTERVAL_MS")]
    interval_ms: u64,

    /// Seed for reproducible traffic
    #[arg(long)]
    seed: Option<u64>,

    /// Log level for apiwatch crates
    #[arg(long, default_value = "info", env = "APIWATCH_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing_for(&["apiwatch_producer", "apiwatch_core"], &args.log_level, args.log_json)?;

    anyhow::ensure!(args.interval_ms > 0, "--interval-ms must be positive");
    let simulator = match args.seed {
        Some(seed) => Simulator::seeded(seed)?,
        None => Simulator::new()?,
    };

    info!(addr = %args.addr, interval_ms = args.interval_ms, "starting apiwatch-producer");

    let app = build_router(AppState::new(
        Duration::from_millis(args.interval_ms),
        simulator,
    ));
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
