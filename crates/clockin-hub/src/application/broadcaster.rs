//! Ordered fan-out of events to channel subscribers.
//!
//! # Publish algorithm
//!
//! ```text
//! publish(channel, msg)
//!   1. gate = hub.gate(channel)          (no gate → nobody ever joined → done)
//!   2. seq  = gate.lock().await          (FIFO: publishers queue in order)
//!   3. seq += 1, wrap msg in an envelope carrying channel + seq
//!   4. subscribers = hub.snapshot(channel)
//!   5. deliver to all of them, at most `max_concurrency` at a time,
//!      each bounded by `delivery_timeout`
//!   6. release the gate
//! ```
//!
//! Because the next publish on the same channel cannot start step 5 until the
//! previous one finished it, every subscriber receives a channel's events in
//! sequence order.  A subscriber that does not accept an event in time is
//! flagged closing and its transport is woken to disconnect it; the publisher
//! only sees the count in the [`DeliveryReport`].

use std::sync::Arc;
use std::time::Duration;

use clockin_core::{ChannelId, ServerEnvelope, ServerMsg};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::application::subscriber::{DeliveryError, Subscriber};
use crate::application::subscription_hub::SubscriptionHub;

/// What happened to one published event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sequence number assigned on the channel, `None` if nothing was sent.
    pub seq: Option<u64>,
    pub delivered: usize,
    /// Subscribers whose connection was already gone.
    pub skipped: usize,
    /// Subscribers that hit the delivery timeout and are being disconnected.
    pub unresponsive: usize,
}

/// Publishes [`ServerMsg`]s to every subscriber of a channel.
pub struct EventBroadcaster {
    hub: Arc<SubscriptionHub>,
    delivery_timeout: Duration,
    max_concurrency: usize,
}

impl EventBroadcaster {
    pub fn new(hub: Arc<SubscriptionHub>, delivery_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            hub,
            delivery_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Publishes `msg` to every live subscriber of `channel`.  Never fails.
    pub async fn publish(&self, channel: &ChannelId, msg: ServerMsg) -> DeliveryReport {
        self.publish_if(channel, msg, || true).await
    }

    /// Like [`publish`](Self::publish), but re-checks `still_current` once the
    /// channel gate is held and drops the event if it returns `false`.
    ///
    /// Rotation uses this so a code superseded while it waited for the gate is
    /// never sent after its replacement.
    pub async fn publish_if<F>(&self, channel: &ChannelId, msg: ServerMsg, still_current: F) -> DeliveryReport
    where
        F: FnOnce() -> bool,
    {
        let Some(gate) = self.hub.gate(channel) else {
            return DeliveryReport::default();
        };
        let mut seq = gate.lock().await;
        if !still_current() {
            debug!(channel = %channel, kind = msg.type_name(), "superseded event dropped");
            return DeliveryReport::default();
        }

        *seq += 1;
        let envelope = Arc::new(ServerEnvelope::broadcast(msg, channel.to_string(), *seq));
        let subscribers = self.hub.snapshot(channel);
        let mut report = DeliveryReport {
            seq: Some(*seq),
            ..DeliveryReport::default()
        };

        let timeout = self.delivery_timeout;
        let results: Vec<(Arc<Subscriber>, Result<(), DeliveryError>)> = stream::iter(subscribers)
            .map(|subscriber| {
                let envelope = Arc::clone(&envelope);
                async move {
                    let result = match tokio::time::timeout(timeout, subscriber.deliver(envelope)).await {
                        Ok(result) => result,
                        Err(_) => Err(DeliveryError::Timeout(timeout)),
                    };
                    (subscriber, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        drop(seq);

        for (subscriber, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    debug!(subscriber = %subscriber.id(), channel = %channel, "subscriber already gone");
                    report.skipped += 1;
                }
                Err(DeliveryError::Timeout(after)) => {
                    warn!(
                        subscriber = %subscriber.id(),
                        channel = %channel,
                        timeout_ms = after.as_millis() as u64,
                        "SubscriberUnresponsive: disconnecting"
                    );
                    subscriber.request_close();
                    report.unresponsive += 1;
                }
            }
        }

        debug!(
            channel = %channel,
            kind = envelope.msg.type_name(),
            seq = ?report.seq,
            delivered = report.delivered,
            skipped = report.skipped,
            unresponsive = report.unresponsive,
            "event published"
        );
        report
    }

    /// Sends `build()` directly to `subscriber` while holding `channel`'s gate.
    ///
    /// The message carries no channel or sequence number, but it cannot
    /// overtake or be overtaken by a broadcast on the same channel.  Returns
    /// `Ok(false)` if `build` produced nothing to send.
    pub async fn send_direct_ordered<F>(
        &self,
        channel: &ChannelId,
        subscriber: &Subscriber,
        build: F,
    ) -> Result<bool, DeliveryError>
    where
        F: FnOnce() -> Option<ServerMsg>,
    {
        let gate = self.hub.gate(channel);
        let _guard = match &gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        let Some(msg) = build() else {
            return Ok(false);
        };
        let envelope = Arc::new(ServerEnvelope::direct(msg));
        match tokio::time::timeout(self.delivery_timeout, subscriber.deliver(envelope)).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
