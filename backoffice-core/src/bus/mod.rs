//! In-process event bus: multi-producer, multi-consumer fan-out.
//!
//! Subscriptions are keyed by event type name; the sentinel `"*"`
//! matches every event. Delivery is non-blocking per recipient: a full
//! subscriber queue drops that subscriber's copy silently and the
//! publisher never waits.
//!
//! Registry discipline is a single readers/writer lock: `publish` and
//! `subscriber_count` take shared mode, `subscribe`/`unsubscribe`/
//! `close` take exclusive mode. No lock is held while a receiver
//! processes an event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use backoffice_common::events::{Event, EventType};

/// Buffer used when a subscriber asks for zero capacity.
pub const DEFAULT_BUFFER: usize = 100;

/// Subscription key that matches every event type.
pub const WILDCARD: &str = "*";

/// Receiving end of a subscription.
pub type EventReceiver = mpsc::Receiver<Arc<Event>>;

/// Handle identifying one subscription; pass back to `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    /// Topic this subscription is registered under.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<Arc<Event>>,
}

/// In-process fan-out pub/sub registry.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<SubscriberEntry>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber for `topic` (an event type name or `"*"`).
    ///
    /// A `buffer` of zero falls back to [`DEFAULT_BUFFER`]. Returns the
    /// bounded receiving endpoint and the handle used to unsubscribe.
    pub fn subscribe(&self, topic: &str, buffer: usize) -> (EventReceiver, Subscription) {
        let capacity = if buffer == 0 { DEFAULT_BUFFER } else { buffer };
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.subscribers.write();
        registry
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberEntry { id, tx });

        (
            rx,
            Subscription {
                topic: topic.to_string(),
                id,
            },
        )
    }

    /// Register a subscriber for a specific event type.
    pub fn subscribe_type(&self, event_type: EventType, buffer: usize) -> (EventReceiver, Subscription) {
        self.subscribe(event_type.as_str(), buffer)
    }

    /// Deliver an event to every subscriber of its type and every
    /// wildcard subscriber. Never blocks: full queues drop the copy.
    pub fn publish(&self, event: Arc<Event>) {
        let registry = self.subscribers.read();

        if let Some(entries) = registry.get(event.event_type.as_str()) {
            for entry in entries {
                if entry.tx.try_send(event.clone()).is_err() {
                    trace!(
                        event_type = %event.event_type,
                        subscriber = entry.id,
                        "subscriber queue full, dropping event copy"
                    );
                }
            }
        }

        if let Some(entries) = registry.get(WILDCARD) {
            for entry in entries {
                if entry.tx.try_send(event.clone()).is_err() {
                    trace!(
                        event_type = %event.event_type,
                        subscriber = entry.id,
                        "wildcard subscriber queue full, dropping event copy"
                    );
                }
            }
        }
    }

    /// Remove one subscription; its channel closes once removed.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut registry = self.subscribers.write();
        if let Some(entries) = registry.get_mut(&subscription.topic) {
            entries.retain(|entry| entry.id != subscription.id);
            if entries.is_empty() {
                registry.remove(&subscription.topic);
            }
        }
    }

    /// Number of subscribers registered for a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Remove and close every subscription.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }
}
