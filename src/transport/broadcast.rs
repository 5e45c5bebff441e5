//! Broadcast transport — primary same-origin bus
//!
//! A `BroadcastHub` plays the role of a browsing context group: every
//! channel opened on the hub under the same name shares one tokio
//! broadcast channel. Each open channel has its own origin id so that its
//! subscriptions skip what it published itself.

use super::{Channel, CloseListener, CloseSignal, InertSubscription, Subscription, Transport};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::types::{BusMessage, TransportKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use uuid::Uuid;

/// Default per-channel buffer of a hub
const DEFAULT_HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    message: BusMessage,
}

struct HubInner {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
    available: bool,
}

/// Shared registry of named broadcast channels
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create a hub buffering up to `capacity` messages per channel
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                available: true,
            }),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.hub_capacity)
    }

    /// A hub on which every open fails, for environments without broadcast support
    pub fn unavailable() -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: Mutex::new(HashMap::new()),
                capacity: 1,
                available: false,
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.available
    }

    fn sender(&self, name: &str) -> Result<broadcast::Sender<Envelope>> {
        if !self.inner.available {
            return Err(AuditError::Transport {
                transport: "broadcast".to_string(),
                reason: "broadcast channels are not available".to_string(),
            });
        }

        let mut channels = self.inner.channels.lock().map_err(|e| AuditError::Transport {
            transport: "broadcast".to_string(),
            reason: format!("hub lock poisoned: {}", e),
        })?;

        let capacity = self.inner.capacity;
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0);
        Ok(sender.clone())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// Transport opening named channels on a `BroadcastHub`
pub struct BroadcastTransport {
    hub: BroadcastHub,
    channel_name: String,
}

impl BroadcastTransport {
    pub fn new(hub: BroadcastHub, channel_name: impl Into<String>) -> Self {
        Self {
            hub,
            channel_name: channel_name.into(),
        }
    }

    /// Transport on the configured channel name
    pub fn from_config(hub: BroadcastHub, config: &AuditConfig) -> Self {
        Self::new(hub, config.channel_name.clone())
    }
}

impl Transport for BroadcastTransport {
    fn open(&self) -> Result<Box<dyn Channel>> {
        let sender = self.hub.sender(&self.channel_name)?;
        Ok(Box::new(BroadcastChannel {
            name: self.channel_name.clone(),
            origin: Uuid::new_v4(),
            sender,
            close: CloseSignal::new(),
        }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// One open channel on a broadcast hub
pub struct BroadcastChannel {
    name: String,
    origin: Uuid,
    sender: broadcast::Sender<Envelope>,
    close: CloseSignal,
}

impl Channel for BroadcastChannel {
    fn publish(&self, message: BusMessage) {
        if self.close.is_closed() {
            tracing::debug!(channel = %self.name, "Publish on closed channel ignored");
            return;
        }

        let envelope = Envelope {
            origin: self.origin,
            message: message.stamped(),
        };
        // Err only means nobody is listening
        if self.sender.send(envelope).is_err() {
            tracing::debug!(channel = %self.name, "Published with no listeners");
        }
    }

    fn subscribe(&self) -> Box<dyn Subscription> {
        if self.close.is_closed() {
            return Box::new(InertSubscription);
        }
        Box::new(BroadcastSubscription {
            rx: self.sender.subscribe(),
            origin: self.origin,
            closed: self.close.listener(),
            cancelled: false,
        })
    }

    fn close(&self) {
        if self.close.close() {
            tracing::info!(channel = %self.name, "Broadcast channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }
}

/// Subscription receiving other channels' broadcasts
pub struct BroadcastSubscription {
    rx: broadcast::Receiver<Envelope>,
    origin: Uuid,
    closed: CloseListener,
    cancelled: bool,
}

impl BroadcastSubscription {
    fn stopped(&self) -> bool {
        self.cancelled || self.closed.is_closed()
    }
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        loop {
            if self.stopped() {
                return None;
            }
            tokio::select! {
                received = self.rx.recv() => match received {
                    Ok(envelope) if envelope.origin == self.origin => continue,
                    Ok(envelope) => return Some(envelope.message),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Broadcast subscription lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = self.closed.closed() => return None,
            }
        }
    }

    fn try_next(&mut self) -> Option<BusMessage> {
        loop {
            if self.stopped() {
                return None;
            }
            match self.rx.try_recv() {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Broadcast subscription lagged, messages dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
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
