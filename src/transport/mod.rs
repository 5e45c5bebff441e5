//! Transport abstraction — same-origin publish/subscribe channels
//!
//! A `Transport` opens a `Channel`; a channel publishes messages to every
//! other channel on the same bus and hands out `Subscription`s that queue
//! inbound messages for a single consumer.
//!
//! - **broadcast** — primary transport over a named in-process hub
//! - **storage** — fallback over a key-value store's change notifications
//!
//! Publishing, subscribing, cancelling, and closing never fail: transport
//! errors are logged and swallowed. Only `Transport::open` reports failure,
//! which the store surfaces as a disconnected status.

use crate::error::Result;
use crate::types::{BusMessage, TransportKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::watch;

pub mod broadcast;
pub mod storage;

pub use broadcast::{BroadcastChannel, BroadcastHub, BroadcastTransport};
pub use storage::{StorageChannel, StorageTransport};

/// Opens channels on a specific delivery mechanism
pub trait Transport: Send + Sync {
    /// Open a new channel, failing when the mechanism is unavailable
    fn open(&self) -> Result<Box<dyn Channel>>;

    /// Which mechanism this transport uses
    fn kind(&self) -> TransportKind;

    /// Transport name for logging (e.g., "broadcast", "storage")
    fn name(&self) -> &str;
}

/// An open publish/subscribe channel
///
/// Messages published on a channel reach every other channel on the same
/// bus, never the publisher's own subscriptions.
pub trait Channel: Send + Sync {
    /// Publish a message (stamped with `ts`/`id` when absent); best-effort
    fn publish(&self, message: BusMessage);

    /// Subscribe to messages from other channels
    ///
    /// Subscriptions of a closed channel yield nothing.
    fn subscribe(&self) -> Box<dyn Subscription>;

    /// Close the channel; idempotent
    fn close(&self);

    /// Whether `close()` has been called
    fn is_closed(&self) -> bool;

    /// Which mechanism this channel runs on
    fn kind(&self) -> TransportKind;
}

/// Single-consumer inbound message queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message; `None` once cancelled or closed
    async fn next(&mut self) -> Option<BusMessage>;

    /// Take the next queued message without waiting
    fn try_next(&mut self) -> Option<BusMessage>;

    /// Stop receiving; idempotent and safe after the channel closed
    fn cancel(&mut self);

    /// Whether `cancel()` has been called
    fn is_cancelled(&self) -> bool;
}

/// Adapt a subscription into a message stream
pub fn into_stream(subscription: Box<dyn Subscription>) -> BoxStream<'static, BusMessage> {
    Box::pin(futures::stream::unfold(subscription, |mut sub| async move {
        sub.next().await.map(|message| (message, sub))
    }))
}

/// Open the primary transport, falling back to the secondary on failure
///
/// Fails only when neither transport can be opened.
pub fn open_with_fallback(
    primary: &dyn Transport,
    fallback: &dyn Transport,
) -> Result<Box<dyn Channel>> {
    match primary.open() {
        Ok(channel) => {
            tracing::info!(transport = primary.name(), "Channel opened");
            Ok(channel)
        }
        Err(primary_err) => {
            tracing::warn!(
                transport = primary.name(),
                fallback = fallback.name(),
                error = %primary_err,
                "Primary transport unavailable, using fallback"
            );
            let channel = fallback.open()?;
            tracing::info!(transport = fallback.name(), "Channel opened");
            Ok(channel)
        }
    }
}

/// Close flag shared between a channel and its subscriptions
pub(crate) struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Mark closed; returns `false` if it already was
    pub(crate) fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn listener(&self) -> CloseListener {
        CloseListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Subscription-side view of a `CloseSignal`
pub(crate) struct CloseListener {
    rx: watch::Receiver<bool>,
}

impl CloseListener {
    pub(crate) fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the channel is closed or dropped
    pub(crate) async fn closed(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Subscription that never yields, handed out when subscribing cannot work
pub(crate) struct InertSubscription;

#[async_trait]
impl Subscription for InertSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        None
    }

    fn try_next(&mut self) -> Option<BusMessage> {
        None
    }

    fn cancel(&mut self) {}

    fn is_cancelled(&self) -> bool {
        true
    }
}
