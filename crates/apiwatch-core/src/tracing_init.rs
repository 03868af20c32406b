//! Shared tracing/logging initialization.
//!
//! Every apiwatch binary sets up `tracing_subscriber` the same way: an
//! env-filter seeded from the configured level and an optional JSON layer.

use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Initialise tracing for a binary from its configured `log_level`.
///
/// The level applies to each of `crates`; `RUST_LOG` still wins when set.
/// An unknown level is a configuration error rather than silently logging
/// nothing.
pub fn init_tracing_for(crates: &[&str], log_level: &str, log_json: bool) -> Result<()> {
    let filter = crate_filter(crates, log_level)?;
    init_tracing(&filter, log_json);
    Ok(())
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"apiwatch_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let fmt = tracing_subscriber::fmt::layer();
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt).init();
    }
}

/// Per-crate filter for a validated, case-insensitive level.
fn crate_filter(crates: &[&str], log_level: &str) -> Result<String> {
    let level = LevelFilter::from_str(log_level.trim())
        .map_err(|_| Error::Config(format!("unknown log level: {log_level:?}")))?;
    Ok(default_filter(crates, &level.to_string().to_lowercase()))
}

/// Build a filter directive that applies `level` to each of `crates`.
///
/// `default_filter(&["apiwatch_relay", "apiwatch_core"], "debug")` yields
/// `"apiwatch_relay=debug,apiwatch_core=debug"`.
pub fn default_filter(crates: &[&str], level: &str) -> String {
    crates
        .iter()
        .map(|c| format!("{c}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}
