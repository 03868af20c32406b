//! Holder of the current relay instance and its reopen policy.
//!
//! A relay never reconnects on its own. The HTTP layer keeps the current
//! instance here and opens a fresh one when a subscriber arrives and the
//! previous upstream is gone. Opens are serialized by their own lock, so at
//! most one upstream connection is being established per slot, while readers
//! of the current relay (`/health`, attaches to a live relay) never wait on it.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use apiwatch_core::config::RelayConfig;

use crate::relay::{RelayError, RelayStats, StreamRelay, Subscription};

pub struct RelaySlot {
    config: RelayConfig,
    current: RwLock<Option<Arc<StreamRelay>>>,
    opening: Mutex<()>,
}

impl RelaySlot {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            opening: Mutex::new(()),
        }
    }

    /// Open the upstream now, replacing any previous relay.
    pub async fn open(&self) -> Result<Arc<StreamRelay>, RelayError> {
        let _opening = self.opening.lock().await;
        let relay = Arc::new(
            StreamRelay::open_upstream(&self.config.upstream_url, &self.config).await?,
        );
        let previous = self.current.write().await.replace(Arc::clone(&relay));
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(relay)
    }

    /// Attach to the current relay, reopening the upstream if it is gone.
    pub async fn attach(&self) -> Result<Subscription, RelayError> {
        if let Some(attached) = self.attach_current().await {
            return attached;
        }

        let _opening = self.opening.lock().await;
        // Another request may have reopened while this one waited.
        if let Some(attached) = self.attach_current().await {
            return attached;
        }

        info!(url = %self.config.upstream_url, "Opening upstream");
        let relay = Arc::new(
            StreamRelay::open_upstream(&self.config.upstream_url, &self.config).await?,
        );
        let subscription = relay.attach().await;
        *self.current.write().await = Some(relay);
        subscription
    }

    /// `None` when there is no relay or its upstream is gone.
    async fn attach_current(&self) -> Option<Result<Subscription, RelayError>> {
        let relay = self.current.read().await.clone()?;
        match relay.attach().await {
            Err(RelayError::UpstreamGone) => None,
            attached => Some(attached),
        }
    }

    /// Statistics of the current relay, if one was ever opened.
    pub async fn stats(&self) -> Option<RelayStats> {
        let relay = self.current.read().await.clone()?;
        Some(relay.stats().await)
    }

    pub fn upstream_url(&self) -> &str {
        &self.config.upstream_url
    }

    /// End the current relay and every subscription on it.
    pub async fn shutdown(&self) {
        let relay = self.current.write().await.take();
        if let Some(relay) = relay {
            relay.shutdown().await;
        }
    }
}
