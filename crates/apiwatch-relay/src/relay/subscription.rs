//! Subscriber-side handle of one relay subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::registry::{SubscriberRegistry, SubscriptionId};

/// One attached subscriber.
///
/// Yields upstream frames verbatim and in order, and ends when the relay
/// detaches it or the upstream goes away. Dropping the handle detaches it.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Bytes>,
    registry: SubscriberRegistry,
}

impl Subscription {
    pub(crate) const fn new(
        id: SubscriptionId,
        rx: mpsc::Receiver<Bytes>,
        registry: SubscriberRegistry,
    ) -> Self {
        Self { id, rx, registry }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next frame, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        let registry = self.registry.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unregister(id).await;
            });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}
