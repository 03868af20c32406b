//! Stream relay types.

use serde::Serialize;

use crate::registry::SubscriptionId;

/// Lifecycle of a relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Reading upstream and forwarding frames.
    Streaming,
    /// Upstream ended or failed; terminal.
    UpstreamGone,
}

/// Point-in-time relay statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub state: RelayState,
    pub subscribers: usize,
    /// Frames read from upstream and offered to subscribers.
    pub frames_relayed: u64,
    /// Subscribers removed after a failed write.
    pub subscribers_evicted: u64,
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Upstream unreachable at {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),

    #[error("Upstream is gone; the relay must be reopened")]
    UpstreamGone,

    #[error("Write to subscriber {id} failed: {reason}")]
    SubscriberWrite { id: SubscriptionId, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
