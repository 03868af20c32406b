//! Registry of attached subscribers and their bounded outbound queues.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of forwarding one frame to every subscriber.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers removed because the frame could not be queued.
    pub evicted: Vec<(SubscriptionId, &'static str)>,
}

struct RegistryInner {
    /// Cleared once the upstream is gone; no further registrations.
    open: bool,
    subscribers: HashMap<SubscriptionId, mpsc::Sender<Bytes>>,
}

/// Thread-safe registry of subscriber queues.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                open: true,
                subscribers: HashMap::new(),
            })),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new subscriber queue. Returns `None` once closed.
    pub async fn register(&self) -> Option<(SubscriptionId, mpsc::Receiver<Bytes>)> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = SubscriptionId::new();

        let mut inner = self.inner.write().await;
        if !inner.open {
            return None;
        }
        inner.subscribers.insert(id, tx);
        let subscribers = inner.subscribers.len();
        drop(inner);

        info!(subscription_id = %id, subscribers, "Subscriber attached");
        Some((id, rx))
    }

    /// Remove a subscriber, dropping its sender so its stream ends.
    pub async fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.write().await.subscribers.remove(&id).is_some();
        if removed {
            info!(subscription_id = %id, "Subscriber detached");
        } else {
            debug!(subscription_id = %id, "Subscriber already detached");
        }
        removed
    }

    /// Queue `frame` for every current subscriber without waiting on any.
    ///
    /// A subscriber whose queue is full or whose receiver is gone is removed.
    /// The subscriber set is read under one lock, so each subscriber sees the
    /// frame at most once.
    pub async fn fan_out(&self, frame: &Bytes) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut failed: Vec<(SubscriptionId, &'static str)> = Vec::new();
        {
            let inner = self.inner.read().await;
            for (id, tx) in &inner.subscribers {
                match tx.try_send(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => failed.push((*id, "outbound queue full")),
                    Err(TrySendError::Closed(_)) => failed.push((*id, "subscriber disconnected")),
                }
            }
        }

        if failed.is_empty() {
            return report;
        }
        let mut inner = self.inner.write().await;
        for (id, reason) in failed {
            if inner.subscribers.remove(&id).is_some() {
                report.evicted.push((id, reason));
            }
        }
        report
    }

    /// Close the registry and end every subscription. Returns how many ended.
    pub async fn close(&self) -> usize {
        let mut inner = self.inner.write().await;
        inner.open = false;
        let ended = inner.subscribers.len();
        inner.subscribers.clear();
        ended
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.open
    }

    /// Count of attached subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = SubscriberRegistry::new(4);
        let (id, _rx) = registry.register().await.unwrap();
        assert_eq!(registry.subscriber_count().await, 1);

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert_eq!(registry.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let registry = SubscriberRegistry::new(4);
        let (_, mut a) = registry.register().await.unwrap();
        let (_, mut b) = registry.register().await.unwrap();

        let report = registry.fan_out(&Bytes::from_static(b"data: 1\n\n")).await;
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        assert_eq!(a.recv().await.unwrap(), "data: 1\n\n");
        assert_eq!(b.recv().await.unwrap(), "data: 1\n\n");
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted() {
        let registry = SubscriberRegistry::new(4);
        let (gone, rx) = registry.register().await.unwrap();
        let (_, mut kept) = registry.register().await.unwrap();
        drop(rx);

        let report = registry.fan_out(&Bytes::from_static(b"x")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![(gone, "subscriber disconnected")]);
        assert_eq!(registry.subscriber_count().await, 1);
        assert_eq!(kept.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn full_queue_is_evicted() {
        let registry = SubscriberRegistry::new(1);
        let (slow, mut slow_rx) = registry.register().await.unwrap();

        registry.fan_out(&Bytes::from_static(b"1")).await;
        let report = registry.fan_out(&Bytes::from_static(b"2")).await;
        assert_eq!(report.evicted, vec![(slow, "outbound queue full")]);

        // The queued frame is still readable, then the stream ends.
        assert_eq!(slow_rx.recv().await.unwrap(), "1");
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_new_ones() {
        let registry = SubscriberRegistry::new(4);
        let (_, mut rx) = registry.register().await.unwrap();

        assert_eq!(registry.close().await, 1);
        assert!(rx.recv().await.is_none());
        assert!(!registry.is_open().await);
        assert!(registry.register().await.is_none());
    }
}
