//! Relay subscriber that feeds the analytics engine.
//!
//! One consumer task owns the [`AnalyticsEngine`]. It reads the relay's
//! `/logs` stream, decodes each SSE frame, ingests it and publishes a fresh
//! [`Aggregates`] snapshot on a `watch` channel. Readers only ever see whole
//! snapshots.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::ACCEPT;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use apiwatch_core::config::AnalyticsConfig;
use apiwatch_core::{SseFramer, decode_frame};

use crate::analytics::{Aggregates, AnalyticsEngine};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Invalid analytics config: {0}")]
    Config(#[from] apiwatch_core::Error),

    #[error("Cannot connect to relay at {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Relay at {url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Relay stream failed: {0}")]
    Stream(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Connection status shown next to the aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    Connecting,
    Live,
    Disconnected,
}

/// What the presentation layer reads.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub status: ConsumerStatus,
    pub snapshot: Aggregates,
    /// Frames skipped because they did not decode.
    pub decode_failures: u64,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            status: ConsumerStatus::Connecting,
            snapshot: Aggregates::default(),
            decode_failures: 0,
        }
    }
}

/// Dashboard side of a relay subscription.
pub struct DashboardConsumer {
    relay_url: String,
    analytics: AnalyticsConfig,
    connect_timeout: Duration,
    state_tx: watch::Sender<DashboardState>,
}

impl DashboardConsumer {
    pub fn new(relay_url: impl Into<String>, analytics: AnalyticsConfig) -> Result<Self, ConsumerError> {
        analytics.validate()?;
        let (state_tx, _) = watch::channel(DashboardState::default());
        Ok(Self {
            relay_url: relay_url.into(),
            analytics,
            connect_timeout: Duration::from_secs(10),
            state_tx,
        })
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Receiver of every published state.
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state_tx.subscribe()
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Connect to the relay and consume until the stream ends or `shutdown`
    /// flips to `true`. The final published status is always `Disconnected`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.set_status(ConsumerStatus::Connecting);
        let response = match self.connect().await {
            Ok(response) => response,
            Err(e) => {
                self.set_status(ConsumerStatus::Disconnected);
                return Err(e);
            }
        };
        info!(url = %self.relay_url, "Connected to relay");
        self.consume(response.bytes_stream(), shutdown).await
    }

    /// Consume an already-open SSE byte stream.
    pub async fn consume<S, E>(
        &self,
        stream: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut engine = AnalyticsEngine::new(self.analytics.clone())?;
        let mut framer = SseFramer::new();
        let mut decode_failures = 0u64;
        tokio::pin!(stream);

        self.state_tx.send_modify(|state| {
            state.status = ConsumerStatus::Live;
            state.snapshot = engine.snapshot();
            state.decode_failures = 0;
        });

        let result = loop {
            if *shutdown.borrow() {
                debug!("Consumer shutting down");
                break Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped, consumer stopping");
                        break Ok(());
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        let mut ingested = false;
                        for frame in framer.push(&chunk) {
                            match decode_frame(&frame) {
                                Ok(Some(event)) => {
                                    engine.ingest(event);
                                    ingested = true;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    decode_failures += 1;
                                    warn!(error = %e, "Skipping undecodable frame");
                                }
                            }
                        }
                        if ingested {
                            let snapshot = engine.snapshot();
                            self.state_tx.send_modify(|state| {
                                state.snapshot = snapshot;
                                state.decode_failures = decode_failures;
                            });
                        }
                    }
                    Some(Err(e)) => break Err(ConsumerError::Stream(e.to_string())),
                    None => {
                        info!(url = %self.relay_url, "Relay stream ended");
                        break Ok(());
                    }
                }
            }
        };

        self.state_tx.send_modify(|state| {
            state.status = ConsumerStatus::Disconnected;
            state.decode_failures = decode_failures;
        });
        result
    }

    async fn connect(&self) -> Result<reqwest::Response, ConsumerError> {
        // reqwest is built with rustls-no-provider. Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;

        let response = client
            .get(&self.relay_url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ConsumerError::Connect {
                url: self.relay_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsumerError::Status {
                url: self.relay_url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn set_status(&self, status: ConsumerStatus) {
        self.state_tx.send_modify(|state| state.status = status);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    type Chunk = Result<Bytes, String>;

    fn consumer(window_capacity: usize) -> DashboardConsumer {
        DashboardConsumer::new(
            "http://127.0.0.1:1/logs",
            AnalyticsConfig {
                window_capacity,
                ..AnalyticsConfig::default()
            },
        )
        .unwrap()
    }

    fn frame(endpoint: &str, status: u16, latency: f64) -> Chunk {
        Ok(Bytes::from(format!(
            "data: {{\"endpoint\":\"{endpoint}\",\"status_code\":{status},\"latency_ms\":{latency},\"timestamp\":\"2026-01-01T00:00:00\"}}\n\n"
        )))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<DashboardState>,
        pred: impl Fn(&DashboardState) -> bool,
    ) -> DashboardState {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s)))
            .await
            .expect("state never reached")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn ingests_frames_and_publishes_snapshots() {
        let consumer = std::sync::Arc::new(consumer(100));
        let mut states = consumer.subscribe();
        let (tx, rx) = mpsc::channel::<Chunk>(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = {
            let consumer = std::sync::Arc::clone(&consumer);
            tokio::spawn(async move { consumer.consume(ReceiverStream::new(rx), shutdown_rx).await })
        };

        tx.send(frame("/a", 200, 50.0)).await.unwrap();
        tx.send(frame("/a", 500, 400.0)).await.unwrap();

        let state = wait_for(&mut states, |s| s.snapshot.event_count == 2).await;
        assert_eq!(state.status, ConsumerStatus::Live);
        assert_eq!(state.snapshot.threat_score, 50);
        assert_eq!(state.snapshot.error_rate, 0.5);

        drop(tx);
        task.await.unwrap().unwrap();
        assert_eq!(states.borrow().status, ConsumerStatus::Disconnected);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let consumer = consumer(100);
        let states = consumer.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let chunks = tokio_stream::iter(vec![
            frame("/a", 200, 10.0),
            Ok(Bytes::from_static(b"data: {not json}\n\n")),
            Ok(Bytes::from_static(b": keep-alive\n\n")),
            frame("/b", 404, 20.0),
        ]);

        consumer.consume(chunks, shutdown_rx).await.unwrap();

        let state = states.borrow();
        assert_eq!(state.status, ConsumerStatus::Disconnected);
        assert_eq!(state.decode_failures, 1);
        assert_eq!(state.snapshot.event_count, 2);
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let consumer = consumer(100);
        let states = consumer.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let whole = frame("/split", 200, 10.0).unwrap();
        let (head, tail) = whole.split_at(17);
        let chunks = tokio_stream::iter(vec![
            Ok::<_, String>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ]);

        consumer.consume(chunks, shutdown_rx).await.unwrap();
        assert_eq!(
            states.borrow().snapshot.endpoint_counts.get("/split"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn stream_error_ends_disconnected() {
        let consumer = consumer(100);
        let states = consumer.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let chunks = tokio_stream::iter(vec![
            frame("/a", 200, 10.0),
            Err("connection reset".to_string()),
        ]);

        let err = consumer.consume(chunks, shutdown_rx).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Stream(_)));
        let state = states.borrow();
        assert_eq!(state.status, ConsumerStatus::Disconnected);
        assert_eq!(state.snapshot.event_count, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_consuming() {
        let consumer = consumer(100);
        let states = consumer.subscribe();
        let (_tx, rx) = mpsc::channel::<Chunk>(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run = consumer.consume(ReceiverStream::new(rx), shutdown_rx);
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("consumer ignored shutdown")
            .unwrap();
        assert_eq!(states.borrow().status, ConsumerStatus::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_relay_is_connect_error() {
        let consumer = consumer(100).with_connect_timeout(Duration::from_secs(2));
        let states = consumer.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = consumer.run(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Connect { .. }), "got {err}");
        assert_eq!(states.borrow().status, ConsumerStatus::Disconnected);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = DashboardConsumer::new(
            "http://127.0.0.1:1/logs",
            AnalyticsConfig {
                window_capacity: 0,
                ..AnalyticsConfig::default()
            },
        );
        assert!(matches!(result, Err(ConsumerError::Config(_))));
    }
}
