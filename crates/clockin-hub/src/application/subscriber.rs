//! Connected clients as seen by the hub.
//!
//! A [`Subscriber`] is the hub's handle on one browser connection.  The hub
//! never touches sockets: it hands [`ServerEnvelope`]s to an [`OutboundSink`]
//! supplied by the transport, and the transport turns them into WebSocket
//! frames.
//!
//! # Lifecycle
//!
//! ```text
//! connect ─► join/leave (any number) ─► request_close? ─► disconnect
//! ```
//!
//! A subscriber that fails to accept an event within the delivery timeout is
//! flagged *closing*.  Closing subscribers are skipped by every later
//! broadcast, and the transport task waiting on [`Subscriber::closed`] wakes
//! up and tears the connection down.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use clockin_core::{ChannelId, ServerEnvelope};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Opaque connection identifier.
pub type SubscriberId = Uuid;

/// Why an envelope could not be handed to a subscriber.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection is gone; its outbound queue no longer exists.
    #[error("subscriber connection is closed")]
    Closed,

    /// The subscriber did not accept the envelope in time.
    #[error("delivery did not complete within {0:?}")]
    Timeout(Duration),
}

/// Where a subscriber's outbound envelopes go.
///
/// Implemented by the transport.  `deliver` may wait (for example on a full
/// queue); the broadcaster bounds that wait with its delivery timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, envelope: Arc<ServerEnvelope>) -> Result<(), DeliveryError>;
}

/// [`OutboundSink`] backed by a bounded tokio channel.
///
/// The receiving half belongs to the connection's writer task.  A full queue
/// makes `deliver` wait, which is what lets the delivery timeout detect a
/// browser that stopped reading.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<ServerEnvelope>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<ServerEnvelope>>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiver the writer task drains.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEnvelope>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl OutboundSink for ChannelSink {
    async fn deliver(&self, envelope: Arc<ServerEnvelope>) -> Result<(), DeliveryError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

// ── Subscriber ────────────────────────────────────────────────────────────────

/// One connected client.
///
/// Channel membership is recorded here as well as in the hub so that
/// `disconnect` can find every channel without scanning all teams.  Only the
/// hub mutates it.
pub struct Subscriber {
    id: SubscriberId,
    sink: Arc<dyn OutboundSink>,
    channels: Mutex<HashSet<ChannelId>>,
    closing: AtomicBool,
    close_signal: Notify,
}

impl Subscriber {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sink,
            channels: Mutex::new(HashSet::new()),
            closing: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Snapshot of the channels this subscriber is joined to.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.lock_channels().iter().cloned().collect()
    }

    pub fn is_joined(&self, channel: &ChannelId) -> bool {
        self.lock_channels().contains(channel)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Flags the subscriber as closing and wakes the transport.
    ///
    /// Returns `true` on the first call only.
    pub fn request_close(&self) -> bool {
        let first = !self.closing.swap(true, Ordering::AcqRel);
        if first {
            // notify_one stores a permit, so a waiter that arrives later
            // still wakes up.
            self.close_signal.notify_one();
        }
        first
    }

    /// Resolves once [`request_close`](Self::request_close) has been called.
    pub async fn closed(&self) {
        while !self.is_closing() {
            self.close_signal.notified().await;
        }
    }

    /// Hands one envelope to the transport.
    pub async fn deliver(&self, envelope: Arc<ServerEnvelope>) -> Result<(), DeliveryError> {
        self.sink.deliver(envelope).await
    }

    pub(crate) fn record_join(&self, channel: &ChannelId) -> bool {
        self.lock_channels().insert(channel.clone())
    }

    pub(crate) fn record_leave(&self, channel: &ChannelId) -> bool {
        self.lock_channels().remove(channel)
    }

    pub(crate) fn take_channels(&self) -> Vec<ChannelId> {
        self.lock_channels().drain().collect()
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashSet<ChannelId>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
