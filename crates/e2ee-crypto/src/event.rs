//! Topic-keyed publish/subscribe event bus.
//!
//! Dispatch is synchronous and best-effort: a handler that panics is caught
//! at the emit boundary, logged, and does not affect the operation that
//! published the event (§5, §7).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Enumerated topic set. `Wildcard` subscribers receive every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SessionCreated,
    SessionExpired,
    SessionRotated,
    MessageEncrypted,
    MessageDecrypted,
    Error,
    Wildcard,
}

/// Why a session left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    Idle,
    Eviction,
    Rotation,
    Explicit,
}

/// Immutable event payload. Handlers never receive key material — only
/// session identifiers, timestamps, and sequence numbers (§5 shared-resource
/// policy).
#[derive(Debug, Clone)]
pub enum Event {
    SessionCreated {
        session_id: String,
        at: DateTime<Utc>,
    },
    SessionExpired {
        session_id: String,
        reason: ExpiryReason,
        at: DateTime<Utc>,
    },
    SessionRotated {
        old_session_id: String,
        new_session_id: String,
        at: DateTime<Utc>,
    },
    MessageEncrypted {
        session_id: String,
        sequence: u32,
        at: DateTime<Utc>,
    },
    MessageDecrypted {
        session_id: String,
        sequence: u32,
        at: DateTime<Utc>,
    },
    Error {
        message: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    fn topic(&self) -> Topic {
        match self {
            Event::SessionCreated { .. } => Topic::SessionCreated,
            Event::SessionExpired { .. } => Topic::SessionExpired,
            Event::SessionRotated { .. } => Topic::SessionRotated,
            Event::MessageEncrypted { .. } => Topic::MessageEncrypted,
            Event::MessageDecrypted { .. } => Topic::MessageDecrypted,
            Event::Error { .. } => Topic::Error,
        }
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: u64,
    topic: Topic,
    handler: Handler,
}

struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// A topic/subscriber surface over an immutable event record. Clone shares
/// the same subscriber list — no actor model required.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a topic (or `Topic::Wildcard` for all events). Returns a
    /// disposer that removes the subscription when called.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Disposer
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            topic,
            handler: Box::new(handler),
        });
        Disposer {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Publish an event to every subscriber of its topic plus every
    /// wildcard subscriber. A handler failure is isolated and logged; it
    /// never propagates to the caller.
    pub fn emit(&self, event: Event) {
        let topic = event.topic();
        let subscribers = self.inner.subscribers.lock();
        for sub in subscribers.iter() {
            if sub.topic != topic && sub.topic != Topic::Wildcard {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event)));
            if result.is_err() {
                tracing::warn!(subscriber_id = sub.id, ?topic, "event handler panicked; isolated");
            }
        }
    }
}

/// Removes its associated subscription when `dispose` is called. Dropping it
/// without disposing leaves the subscription active — disposal is explicit,
/// matching how callers expect to control subscription lifetime.
pub struct Disposer {
    inner: Arc<Inner>,
    id: u64,
}

impl Disposer {
    pub fn dispose(self) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|s| s.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_matching_topic_and_wildcard() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_specific = Arc::clone(&count);
        let count_wild = Arc::clone(&count);
        bus.subscribe(Topic::SessionCreated, move |_| {
            count_specific.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(Topic::Wildcard, move |_| {
            count_wild.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::SessionCreated {
            session_id: "s1".into(),
            at: Utc::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_subscriber_stops_receiving() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let disposer = bus.subscribe(Topic::Error, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        disposer.dispose();

        bus.emit(Event::Error {
            message: "boom".into(),
            at: Utc::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_affect_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.subscribe(Topic::Error, |_| panic!("handler blew up"));
        bus.subscribe(Topic::Error, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::Error {
            message: "boom".into(),
            at: Utc::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
