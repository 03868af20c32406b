//! `GET /health` for the relay.
//!
//! Reports liveness plus the state of the current upstream so operators can
//! tell a healthy relay with a dead producer from a dead relay.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::routes::AppState;
use crate::relay::RelayState;

/// Body of the health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub upstream_url: String,
    /// `None` until an upstream was opened at least once.
    pub upstream: Option<RelayState>,
    pub subscribers: usize,
    pub frames_relayed: u64,
    pub subscribers_evicted: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // If this handler runs, the relay is alive and serving HTTP.
    let stats = state.relays.stats().await;
    Json(HealthResponse {
        status: "healthy",
        upstream_url: state.relays.upstream_url().to_string(),
        upstream: stats.as_ref().map(|s| s.state),
        subscribers: stats.as_ref().map_or(0, |s| s.subscribers),
        frames_relayed: stats.as_ref().map_or(0, |s| s.frames_relayed),
        subscribers_evicted: stats.as_ref().map_or(0, |s| s.subscribers_evicted),
    })
}
