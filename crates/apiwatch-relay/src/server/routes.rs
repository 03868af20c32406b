use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::health;
use super::slot::RelaySlot;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relays: Arc<RelaySlot>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/logs", get(logs))
        .route("/health", get(health::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /logs`: long-lived `text/event-stream` of upstream frames.
///
/// The body ends when the upstream ends or the subscription is dropped by the
/// relay. A client hanging up drops the body, which detaches it.
pub async fn logs(State(state): State<AppState>) -> Response {
    match state.relays.attach().await {
        Ok(subscription) => {
            info!(subscription_id = %subscription.id(), "Streaming to subscriber");
            let body = Body::from_stream(subscription.map(Ok::<_, Infallible>));
            (
                [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Cannot attach subscriber");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
