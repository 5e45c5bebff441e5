//! Storage transport — fallback bus over key-value change notifications
//!
//! Publishing writes the serialized message under the channel key and
//! removes it again, so every publish is observed as a change by the other
//! contexts sharing the store. Subscribers only see `{key, new_value}` and
//! rebuild the message by parsing `new_value`.

use super::{Channel, CloseListener, CloseSignal, InertSubscription, Subscription, Transport};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::state::{KeyValueStore, StorageChange, StorageWatch};
use crate::types::{BusMessage, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Transport opening channels over a shared key-value store
pub struct StorageTransport {
    store: Arc<dyn KeyValueStore>,
    channel_name: String,
}

impl StorageTransport {
    pub fn new(store: Arc<dyn KeyValueStore>, channel_name: impl Into<String>) -> Self {
        Self {
            store,
            channel_name: channel_name.into(),
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &AuditConfig) -> Self {
        Self::new(store, config.channel_name.clone())
    }
}

impl Transport for StorageTransport {
    fn open(&self) -> Result<Box<dyn Channel>> {
        // Probe for change notification support up front
        self.store.watch().map_err(|e| AuditError::Transport {
            transport: "storage".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(StorageChannel {
            store: Arc::clone(&self.store),
            key: self.channel_name.clone(),
            close: CloseSignal::new(),
        }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }

    fn name(&self) -> &str {
        "storage"
    }
}

/// One open channel over a key-value store
pub struct StorageChannel {
    store: Arc<dyn KeyValueStore>,
    key: String,
    close: CloseSignal,
}

impl Channel for StorageChannel {
    fn publish(&self, message: BusMessage) {
        if self.close.is_closed() {
            tracing::debug!(channel = %self.key, "Publish on closed channel ignored");
            return;
        }

        let json = match serde_json::to_string(&message.stamped()) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(channel = %self.key, error = %e, "Failed to serialize message");
                return;
            }
        };

        let written = self
            .store
            .set(&self.key, &json)
            .and_then(|()| self.store.remove(&self.key));
        if let Err(e) = written {
            tracing::warn!(
                channel = %self.key,
                store = self.store.name(),
                error = %e,
                "Failed to publish through storage"
            );
        }
    }

    fn subscribe(&self) -> Box<dyn Subscription> {
        if self.close.is_closed() {
            return Box::new(InertSubscription);
        }
        match self.store.watch() {
            Ok(watch) => Box::new(StorageSubscription {
                watch,
                key: self.key.clone(),
                closed: self.close.listener(),
                cancelled: false,
            }),
            Err(e) => {
                tracing::warn!(channel = %self.key, error = %e, "Failed to watch storage");
                Box::new(InertSubscription)
            }
        }
    }

    fn close(&self) {
        // Nothing to release; only stop delivering
        if self.close.close() {
            tracing::info!(channel = %self.key, "Storage channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }
}

/// Subscription rebuilding messages from storage changes
pub struct StorageSubscription {
    watch: StorageWatch,
    key: String,
    closed: CloseListener,
    cancelled: bool,
}

impl StorageSubscription {
    fn stopped(&self) -> bool {
        self.cancelled || self.closed.is_closed()
    }

    /// Parse a change into a message; removals, other keys, and
    /// unparsable values are dropped
    fn decode(&self, change: StorageChange) -> Option<BusMessage> {
        if change.key != self.key {
            return None;
        }
        let raw = change.new_value?;
        match serde_json::from_str(&raw) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(channel = %self.key, error = %e, "Dropping unparsable storage message");
                None
            }
        }
    }
}

#[async_trait]
impl Subscription for StorageSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        loop {
            if self.stopped() {
                return None;
            }
            let change = tokio::select! {
                change = self.watch.recv() => change?,
                _ = self.closed.closed() => return None,
            };
            if let Some(message) = self.decode(change) {
                return Some(message);
            }
        }
    }

    fn try_next(&mut self) -> Option<BusMessage> {
        loop {
            if self.stopped() {
                return None;
            }
            let change = self.watch.try_recv()?;
            if let Some(message) = self.decode(change) {
                return Some(message);
            }
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
