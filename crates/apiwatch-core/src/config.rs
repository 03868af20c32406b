//! Configuration resolution for apiwatch.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (explicit path, or ~/.config/apiwatch/settings.json)
//! 3. Environment variables (`APIWATCH_*`)
//! 4. CLI arguments (highest priority, applied by each binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Complete apiwatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub dashboard: DashboardConfig,
    pub analytics: AnalyticsConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            dashboard: DashboardConfig::default(),
            analytics: AnalyticsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;
        self.analytics.validate()
    }
}

/// Stream relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Producer endpoint the relay pulls from.
    pub upstream_url: String,
    /// Address the subscriber-facing server binds.
    pub listen_addr: SocketAddr,
    /// Frames buffered per subscriber before it is evicted as unresponsive.
    pub queue_capacity: usize,
    /// Initial upstream connect timeout (seconds).
    pub connect_timeout_secs: u64,
    /// Largest SSE frame accepted from upstream.
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: "http://127.0.0.1:5000/logs".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            queue_capacity: 256,
            connect_timeout_secs: 10,
            max_frame_bytes: 1024 * 1024, // 1 MB
        }
    }
}

impl RelayConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream_url.is_empty() {
            return Err(Error::Config("relay.upstream_url is empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("relay.queue_capacity must be at least 1".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::Config("relay.max_frame_bytes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Dashboard consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Relay subscriber endpoint.
    pub relay_url: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8080/logs".to_string(),
        }
    }
}

/// Windowed analytics parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Events kept in the recency window.
    pub window_capacity: usize,
    /// Threat score weight of the error rate.
    pub error_weight: f64,
    /// Threat score weight of the high-latency rate.
    pub latency_weight: f64,
    /// Latency above which a request counts as slow (ms).
    pub high_latency_threshold_ms: f64,
    /// Upstream anomaly scores at or below this mark an event anomalous.
    pub anomaly_score_threshold: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            error_weight: 0.6,
            latency_weight: 0.4,
            high_latency_threshold_ms: 300.0,
            anomaly_score_threshold: -0.5,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_capacity == 0 {
            return Err(Error::Config(
                "analytics.window_capacity must be at least 1".into(),
            ));
        }
        for (name, weight) in [
            ("error_weight", self.error_weight),
            ("latency_weight", self.latency_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::Config(format!(
                    "analytics.{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        if !self.high_latency_threshold_ms.is_finite() {
            return Err(Error::Config(
                "analytics.high_latency_threshold_ms must be finite".into(),
            ));
        }
        if !self.anomaly_score_threshold.is_finite() {
            return Err(Error::Config(
                "analytics.anomaly_score_threshold must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global settings file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".apiwatch").join("settings.json"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("apiwatch").join("settings.json"))
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `APIWATCH_*` overrides read through `lookup`.
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, val: &str) -> Option<T> {
        let parsed = val.parse().ok();
        if parsed.is_none() {
            warn!(key, value = val, "Ignoring unparseable environment override");
        }
        parsed
    }

    if let Some(val) = lookup("APIWATCH_UPSTREAM_URL") {
        config.relay.upstream_url = val;
    }
    if let Some(val) = lookup("APIWATCH_LISTEN_ADDR")
        && let Some(addr) = parsed("APIWATCH_LISTEN_ADDR", &val)
    {
        config.relay.listen_addr = addr;
    }
    if let Some(val) = lookup("APIWATCH_QUEUE_CAPACITY")
        && let Some(n) = parsed("APIWATCH_QUEUE_CAPACITY", &val)
    {
        config.relay.queue_capacity = n;
    }
    if let Some(val) = lookup("APIWATCH_RELAY_URL") {
        config.dashboard.relay_url = val;
    }
    if let Some(val) = lookup("APIWATCH_WINDOW_CAPACITY")
        && let Some(n) = parsed("APIWATCH_WINDOW_CAPACITY", &val)
    {
        config.analytics.window_capacity = n;
    }
    if let Some(val) = lookup("APIWATCH_LOG_LEVEL") {
        config.log_level = val;
    }
}
