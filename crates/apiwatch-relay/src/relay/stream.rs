//! One upstream event stream fanned out to many subscribers.
//!
//! A relay owns exactly one upstream connection. A single reader task splits
//! the upstream bytes into SSE frames and offers each frame to every attached
//! subscriber's bounded queue without waiting on any of them, so a slow or
//! vanished subscriber only ever costs its own subscription. When the upstream
//! ends or fails the relay becomes terminal and every subscription ends.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use reqwest::header::ACCEPT;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use apiwatch_core::SseFramer;
use apiwatch_core::config::RelayConfig;

use super::subscription::Subscription;
use super::types::{RelayError, RelayState, RelayStats};
use crate::registry::{SubscriberRegistry, SubscriptionId};

#[derive(Default)]
struct RelayCounters {
    frames_relayed: AtomicU64,
    subscribers_evicted: AtomicU64,
}

enum UpstreamEnd {
    Closed,
    Failed(RelayError),
    Shutdown,
}

/// Relay for a single logical stream.
pub struct StreamRelay {
    source_url: String,
    registry: SubscriberRegistry,
    counters: Arc<RelayCounters>,
    cancel: CancellationToken,
}

impl StreamRelay {
    /// Connect to the producer and start relaying.
    ///
    /// Connection failures, non-success responses and a missing response
    /// within the connect timeout surface as
    /// [`RelayError::UpstreamUnreachable`]. Nothing is retried here.
    pub async fn open_upstream(source_url: &str, config: &RelayConfig) -> Result<Self, RelayError> {
        let client = upstream_client(config)?;
        let unreachable = |reason: String| RelayError::UpstreamUnreachable {
            url: source_url.to_string(),
            reason,
        };

        // Connect plus response headers; a peer that accepts and never
        // answers is unreachable.
        let timeout = config.connect_timeout();
        let request = client.get(source_url).header(ACCEPT, "text/event-stream").send();
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| unreachable(format!("no response headers within {timeout:?}")))?
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        info!(url = source_url, "Upstream connected");
        Ok(Self::from_byte_stream(
            source_url,
            config,
            response.bytes_stream(),
        ))
    }

    /// Relay an already-established upstream byte stream.
    pub fn from_byte_stream<S, E>(source_url: &str, config: &RelayConfig, upstream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let relay = Self {
            source_url: source_url.to_string(),
            registry: SubscriberRegistry::new(config.queue_capacity),
            counters: Arc::new(RelayCounters::default()),
            cancel: CancellationToken::new(),
        };

        tokio::spawn(pump(
            relay.source_url.clone(),
            Box::pin(upstream),
            SseFramer::with_max_frame_bytes(config.max_frame_bytes),
            relay.registry.clone(),
            Arc::clone(&relay.counters),
            relay.cancel.clone(),
        ));

        relay
    }

    /// Attach a new subscriber. It receives only frames read after this call.
    pub async fn attach(&self) -> Result<Subscription, RelayError> {
        let (id, rx) = self
            .registry
            .register()
            .await
            .ok_or(RelayError::UpstreamGone)?;
        Ok(Subscription::new(id, rx, self.registry.clone()))
    }

    /// Detach a subscriber. Idempotent.
    pub async fn detach(&self, id: SubscriptionId) -> bool {
        self.registry.unregister(id).await
    }

    pub async fn state(&self) -> RelayState {
        if self.registry.is_open().await {
            RelayState::Streaming
        } else {
            RelayState::UpstreamGone
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count().await
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            state: self.state().await,
            subscribers: self.subscriber_count().await,
            frames_relayed: self.counters.frames_relayed.load(Ordering::Relaxed),
            subscribers_evicted: self.counters.subscribers_evicted.load(Ordering::Relaxed),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Stop reading upstream and end every subscription.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let ended = self.registry.close().await;
        if ended > 0 {
            info!(url = %self.source_url, subscribers = ended, "Relay shut down");
        }
    }
}

impl Drop for StreamRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn upstream_client(config: &RelayConfig) -> Result<reqwest::Client, RelayError> {
    // reqwest is built with rustls-no-provider. Err means already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    Ok(reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?)
}

async fn pump<S, E>(
    source_url: String,
    mut upstream: Pin<Box<S>>,
    mut framer: SseFramer,
    registry: SubscriberRegistry,
    counters: Arc<RelayCounters>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display,
{
    let end = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break UpstreamEnd::Shutdown,
            next = upstream.next() => match next {
                Some(Ok(chunk)) => {
                    for frame in framer.push(&chunk) {
                        relay_frame(&registry, &counters, &frame).await;
                    }
                }
                Some(Err(e)) => break UpstreamEnd::Failed(RelayError::UpstreamStream(e.to_string())),
                None => break UpstreamEnd::Closed,
            }
        }
    };

    if framer.pending() > 0 {
        debug!(url = %source_url, bytes = framer.pending(), "Dropping incomplete trailing frame");
    }

    let ended = registry.close().await;
    match end {
        UpstreamEnd::Closed => {
            info!(url = %source_url, subscribers = ended, "Upstream closed, subscriptions ended");
        }
        UpstreamEnd::Failed(err) => {
            warn!(url = %source_url, error = %err, subscribers = ended, "Upstream failed, subscriptions ended");
        }
        UpstreamEnd::Shutdown => {
            debug!(url = %source_url, subscribers = ended, "Relay reader stopped");
        }
    }
}

async fn relay_frame(registry: &SubscriberRegistry, counters: &RelayCounters, frame: &Bytes) {
    counters.frames_relayed.fetch_add(1, Ordering::Relaxed);
    let report = registry.fan_out(frame).await;

    for (id, reason) in report.evicted {
        counters.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
        let err = RelayError::SubscriberWrite {
            id,
            reason: reason.to_string(),
        };
        warn!(subscription_id = %id, error = %err, "Subscriber detached");
    }
    debug!(delivered = report.delivered, bytes = frame.len(), "Frame relayed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    type Chunk = Result<Bytes, String>;

    fn frame(n: usize) -> Bytes {
        Bytes::from(format!("data: {{\"n\":{n}}}\n\n"))
    }

    /// Relay fed by a channel the test controls.
    fn channel_relay(queue_capacity: usize) -> (StreamRelay, mpsc::Sender<Chunk>) {
        let (tx, rx) = mpsc::channel::<Chunk>(64);
        let config = RelayConfig {
            queue_capacity,
            ..Default::default()
        };
        let relay = StreamRelay::from_byte_stream("test://upstream", &config, ReceiverStream::new(rx));
        (relay, tx)
    }

    async fn next(sub: &mut Subscription) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("subscriber stalled")
    }

    #[tokio::test]
    async fn frames_reach_all_subscribers_in_order() {
        let (relay, upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();
        let mut b = relay.attach().await.unwrap();

        for n in 0..3 {
            upstream.send(Ok(frame(n))).await.unwrap();
        }
        for n in 0..3 {
            assert_eq!(next(&mut a).await.unwrap(), frame(n));
            assert_eq!(next(&mut b).await.unwrap(), frame(n));
        }
    }

    #[tokio::test]
    async fn chunks_are_reassembled_into_frames() {
        let (relay, upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();

        let wire = frame(1);
        let (head, tail) = wire.split_at(5);
        upstream.send(Ok(Bytes::copy_from_slice(head))).await.unwrap();
        upstream.send(Ok(Bytes::copy_from_slice(tail))).await.unwrap();

        assert_eq!(next(&mut a).await.unwrap(), frame(1));
    }

    #[tokio::test]
    async fn detaching_one_subscriber_leaves_others_untouched() {
        let (relay, upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();
        let mut b = relay.attach().await.unwrap();
        let mut c = relay.attach().await.unwrap();

        upstream.send(Ok(frame(1))).await.unwrap();
        assert_eq!(next(&mut b).await.unwrap(), frame(1));

        assert!(relay.detach(b.id()).await);
        assert!(!relay.detach(b.id()).await);

        upstream.send(Ok(frame(2))).await.unwrap();
        for sub in [&mut a, &mut c] {
            assert_eq!(next(sub).await.unwrap(), frame(1));
            assert_eq!(next(sub).await.unwrap(), frame(2));
        }
        assert!(next(&mut b).await.is_none());
        assert_eq!(relay.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_new_frames() {
        let (relay, upstream) = channel_relay(16);
        let mut early = relay.attach().await.unwrap();

        for n in 0..5 {
            upstream.send(Ok(frame(n))).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(next(&mut early).await.unwrap(), frame(n));
        }

        let mut late = relay.attach().await.unwrap();
        upstream.send(Ok(frame(5))).await.unwrap();
        assert_eq!(next(&mut late).await.unwrap(), frame(5));
        assert_eq!(next(&mut early).await.unwrap(), frame(5));
    }

    #[tokio::test]
    async fn upstream_close_ends_every_subscription() {
        let (relay, upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();
        let mut b = relay.attach().await.unwrap();

        upstream.send(Ok(frame(1))).await.unwrap();
        drop(upstream);

        for sub in [&mut a, &mut b] {
            assert_eq!(next(sub).await.unwrap(), frame(1));
            assert!(next(sub).await.is_none());
        }
        assert_eq!(relay.state().await, RelayState::UpstreamGone);
        assert!(matches!(relay.attach().await, Err(RelayError::UpstreamGone)));
    }

    #[tokio::test]
    async fn upstream_error_ends_every_subscription() {
        let (relay, upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();

        upstream.send(Err("connection reset".into())).await.unwrap();
        assert!(next(&mut a).await.is_none());
        assert_eq!(relay.state().await, RelayState::UpstreamGone);

        // Nothing is delivered after the end, even if upstream had more.
        let _ = upstream.send(Ok(frame(9))).await;
        assert_eq!(relay.stats().await.frames_relayed, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_stalling_others() {
        let (relay, upstream) = channel_relay(2);
        let mut fast = relay.attach().await.unwrap();
        let mut slow = relay.attach().await.unwrap();

        for n in 0..5 {
            upstream.send(Ok(frame(n))).await.unwrap();
            assert_eq!(next(&mut fast).await.unwrap(), frame(n));
        }

        let stats = relay.stats().await;
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.subscribers_evicted, 1);
        assert_eq!(stats.frames_relayed, 5);

        assert_eq!(next(&mut slow).await.unwrap(), frame(0));
        assert_eq!(next(&mut slow).await.unwrap(), frame(1));
        assert!(next(&mut slow).await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_detaches_itself() {
        let (relay, _upstream) = channel_relay(16);
        let sub = relay.attach().await.unwrap();
        assert_eq!(relay.subscriber_count().await, 1);
        drop(sub);

        for _ in 0..50 {
            if relay.subscriber_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscription was not released");
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let (relay, _upstream) = channel_relay(16);
        let mut a = relay.attach().await.unwrap();
        relay.shutdown().await;
        assert!(next(&mut a).await.is_none());
        assert_eq!(relay.state().await, RelayState::UpstreamGone);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_reported() {
        let config = RelayConfig {
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let err = StreamRelay::open_upstream("http://127.0.0.1:1/logs", &config)
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, RelayError::UpstreamUnreachable { .. }));
    }

    #[tokio::test]
    async fn silent_upstream_times_out_as_unreachable() {
        // Accepts connections and never writes a byte.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = RelayConfig {
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            StreamRelay::open_upstream(&format!("http://{addr}/logs"), &config),
        )
        .await
        .expect("open did not give up")
        .err()
        .expect("open should fail");
        assert!(matches!(err, RelayError::UpstreamUnreachable { .. }));
    }
}
