//! apiwatch dashboard
//!
//! Subscribes to the relay and logs a summary line for every new snapshot.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use apiwatch_core::config::load_config;
use apiwatch_core::tracing_init::init_tracing_for;
use apiwatch_dashboard::{ConsumerStatus, DashboardConsumer, DashboardState};

#[derive(Parser, Debug)]
#[command(name = "apiwatch-dashboard")]
#[command(version, about = "apiwatch dashboard - live traffic health from the relay stream")]
struct Args {
    /// Path to a JSON settings file. Defaults to the global settings file if present.
    #[arg(long, env = "APIWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Relay `/logs` endpoint to subscribe to.
    #[arg(long)]
    relay_url: Option<String>,

    /// Number of recent events kept in the window.
    #[arg(long)]
    window_capacity: Option<usize>,

    /// Log each snapshot as a JSON document instead of a summary line.
    #[arg(long)]
    snapshot_json: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.relay_url {
        config.dashboard.relay_url = url;
    }
    if let Some(capacity) = args.window_capacity {
        config.analytics.window_capacity = capacity;
    }

    init_tracing_for(&["apiwatch_dashboard", "apiwatch_core"], &config.log_level, args.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.dashboard.relay_url,
        window = config.analytics.window_capacity,
        "Starting apiwatch-dashboard"
    );

    let consumer = DashboardConsumer::new(config.dashboard.relay_url, config.analytics)?;
    let states = consumer.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reporter = tokio::spawn(report(states, args.snapshot_json));

    let result = {
        let run = consumer.run(shutdown_rx);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
                run.await
            }
        }
    };
    if let Err(e) = result {
        error!(error = %e, "Relay subscription failed");
    }

    drop(consumer);
    let _ = reporter.await;
    info!("Dashboard stopped");
    Ok(())
}

/// Log every published state until the consumer goes away.
async fn report(mut states: watch::Receiver<DashboardState>, as_json: bool) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        if state.status == ConsumerStatus::Disconnected {
            warn!(events = state.snapshot.event_count, "Disconnected from relay");
            continue;
        }
        if state.snapshot.event_count == 0 {
            continue;
        }

        if as_json {
            match serde_json::to_string(&state) {
                Ok(json) => info!(snapshot = %json, "Snapshot"),
                Err(e) => warn!(error = %e, "Cannot serialize snapshot"),
            }
            continue;
        }

        let snapshot = &state.snapshot;
        let busiest = snapshot.busiest_endpoint().map_or("-", |(endpoint, _)| endpoint);
        info!(
            events = snapshot.event_count,
            avg_latency_ms = %format!("{:.1}", snapshot.avg_latency_ms),
            error_rate_pct = snapshot.error_rate_percent(),
            high_latency_pct = %format!("{:.1}", snapshot.high_latency_rate * 100.0),
            threat_score = snapshot.threat_score,
            anomalies = snapshot.severity_counts.anomalous(),
            busiest,
            skipped = state.decode_failures,
            "Snapshot"
        );
    }
}
