//! Session-scoped publish/subscribe event bus.
//!
//! Subscribers register a callback per event kind (or `"*"` for all kinds).
//! [`EventBus::publish`] stamps the session id and a monotonically
//! increasing sequence number, snapshots the subscriber list, and invokes
//! each callback outside the subscriber-map lock -- so subscribing or
//! unsubscribing from inside a callback is legal and does not affect the
//! dispatch already in flight.
//!
//! A panicking subscriber is caught and logged; it never propagates into
//! the publisher.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{Event, EventEnvelope};

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

struct BusInner {
    session_id: String,
    sequence: AtomicU64,
    next_subscriber: AtomicU64,
    /// kind -> [(id, callback)]; `"*"` holds the catch-all subscribers.
    subscribers: Mutex<HashMap<String, Vec<(SubscriberId, Callback)>>>,
}

/// Publish/subscribe event bus for one program session.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("session_id", &self.inner.session_id)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus for the given session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                session_id: session_id.into(),
                sequence: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The session this bus belongs to.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Register `callback` for events of `kind` (`"*"` for every kind).
    ///
    /// Returns a [`SubscriberId`] that can be passed to
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &self,
        kind: impl Into<String>,
        callback: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
        subscribers
            .entry(kind.into())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber.  Removing an unknown id is a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
        for list in subscribers.values_mut() {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Publish an event to every matching subscriber.
    ///
    /// Returns the stamped envelope so callers can correlate sequence
    /// numbers (e.g. in tests).
    pub fn publish(&self, event: Event) -> EventEnvelope {
        let envelope = EventEnvelope {
            session_id: self.inner.session_id.clone(),
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: chrono::Utc::now(),
            event,
        };

        // Snapshot callbacks under the lock, invoke them after releasing it
        // so callbacks may themselves subscribe/unsubscribe.
        let callbacks: Vec<Callback> = {
            let subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
            let mut snapshot = Vec::new();
            if let Some(list) = subscribers.get(envelope.event.kind()) {
                snapshot.extend(list.iter().map(|(_, cb)| Arc::clone(cb)));
            }
            if let Some(list) = subscribers.get("*") {
                snapshot.extend(list.iter().map(|(_, cb)| Arc::clone(cb)));
            }
            snapshot
        };

        for callback in callbacks {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(&envelope)));
            if result.is_err() {
                tracing::error!(
                    kind = envelope.event.kind(),
                    sequence = envelope.sequence,
                    "event subscriber panicked; continuing dispatch"
                );
            }
        }

        tracing::trace!(
            kind = envelope.event.kind(),
            sequence = envelope.sequence,
            "event published"
        );

        envelope
    }

    /// Number of registered subscriptions across all kinds.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.inner.subscribers.lock().expect("bus lock poisoned");
        subscribers.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn publish_reaches_kind_subscriber() {
        let bus = EventBus::new("test_session");
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        bus.subscribe("stream_complete", move |envelope| {
            assert_eq!(envelope.session_id, "test_session");
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::StreamComplete {
            stream_id: "s-1".into(),
        });
        // Non-matching kind is not delivered.
        bus.publish(Event::StreamChunk {
            stream_id: "s-1".into(),
            content: "x".into(),
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_receives_everything() {
        let bus = EventBus::new("test_session");
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        bus.subscribe("*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::AgentsChanged { agents: vec![] });
        bus.publish(Event::StreamComplete {
            stream_id: "s-1".into(),
        });

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let bus = EventBus::new("test_session");
        let first = bus.publish(Event::AgentsChanged { agents: vec![] });
        let second = bus.publish(Event::AgentsChanged { agents: vec![] });
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_dispatch() {
        let bus = EventBus::new("test_session");
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("*", |_| panic!("boom"));
        let hits_clone = Arc::clone(&hits);
        bus.subscribe("*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::AgentsChanged { agents: vec![] });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_during_publish_is_legal() {
        let bus = EventBus::new("test_session");
        let bus_clone = bus.clone();

        bus.subscribe("*", move |_| {
            // Must not deadlock.
            bus_clone.subscribe("*", |_| {});
        });

        bus.publish(Event::AgentsChanged { agents: vec![] });
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new("test_session");
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = bus.subscribe("*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::AgentsChanged { agents: vec![] });
        bus.unsubscribe(id);
        bus.publish(Event::AgentsChanged { agents: vec![] });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
