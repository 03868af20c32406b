use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use apiwatch_core::sse::encode_frame;

use crate::simulate::Simulator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Pause between two events on `/logs`.
    pub interval: Duration,
    pub simulator: Arc<Mutex<Simulator>>,
}

impl AppState {
    pub fn new(interval: Duration, simulator: Simulator) -> Self {
        Self {
            interval,
            simulator: Arc::new(Mutex::new(simulator)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/logs", get(logs))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /logs`: endless `text/event-stream`, one event per interval.
///
/// The first event is sent immediately. The generator stops when the client
/// hangs up.
pub async fn logs(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(generate(state, tx));
    info!("Client subscribed to /logs");

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>)),
    )
        .into_response()
}

async fn generate(state: AppState, tx: mpsc::Sender<Bytes>) {
    let mut ticker = tokio::time::interval(state.interval);
    loop {
        ticker.tick().await;
        let event = state.simulator.lock().await.next_event();
        let frame = match encode_frame(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Cannot encode event");
                continue;
            }
        };
        if tx.send(frame).await.is_err() {
            debug!("Client left /logs");
            return;
        }
    }
}

/// `GET /api/status`: random overall health label.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let status = state.simulator.lock().await.health_status();
    Json(json!({ "status": status }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
