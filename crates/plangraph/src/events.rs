//! Mutation events and the bus that dispatches them.
//!
//! Repositories emit one event per committed mutation, synchronously, after
//! the write is durable. Subscribers are plain closures; anything slow should
//! hand the event off to its own queue (see [`SearchSync`](crate::search::SearchSync)).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use plangraph_schema::Record;

/// What kind of mutation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Inserted,
    Updated,
    Deleted,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

/// A committed change to one record.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    Inserted {
        collection: String,
        id: String,
        current: Arc<Record>,
    },
    Updated {
        collection: String,
        id: String,
        previous: Arc<Record>,
        current: Arc<Record>,
    },
    Deleted {
        collection: String,
        id: String,
        previous: Arc<Record>,
    },
}

impl MutationEvent {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Inserted { .. } => MutationKind::Inserted,
            Self::Updated { .. } => MutationKind::Updated,
            Self::Deleted { .. } => MutationKind::Deleted,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Inserted { collection, .. }
            | Self::Updated { collection, .. }
            | Self::Deleted { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Inserted { id, .. } | Self::Updated { id, .. } | Self::Deleted { id, .. } => id,
        }
    }

    /// The record before the mutation (`None` for inserts).
    pub fn previous(&self) -> Option<&Arc<Record>> {
        match self {
            Self::Inserted { .. } => None,
            Self::Updated { previous, .. } | Self::Deleted { previous, .. } => Some(previous),
        }
    }

    /// The record after the mutation (`None` for deletes).
    pub fn current(&self) -> Option<&Arc<Record>> {
        match self {
            Self::Inserted { current, .. } | Self::Updated { current, .. } => Some(current),
            Self::Deleted { .. } => None,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&MutationEvent) + Send + Sync>;

/// Synchronous fan-out of mutation events.
///
/// Handlers run in subscription order on the emitting task. The handler list
/// is snapshotted before dispatch, so handlers may subscribe or unsubscribe
/// without deadlocking.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&MutationEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: &MutationEvent) {
        let handlers: Vec<Handler> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        tracing::trace!(
            kind = %event.kind(),
            collection = event.collection(),
            id = event.id(),
            subscribers = handlers.len(),
            "emitting mutation event"
        );
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn record(id: &str) -> Arc<Record> {
        Arc::new(Record::from_value(json!({"id": id})).unwrap())
    }

    #[test]
    fn test_accessors() {
        let event = MutationEvent::Updated {
            collection: "tasks".into(),
            id: "T1".into(),
            previous: record("T1"),
            current: record("T1"),
        };
        assert_eq!(event.kind(), MutationKind::Updated);
        assert_eq!(event.collection(), "tasks");
        assert_eq!(event.id(), "T1");
        assert!(event.previous().is_some());
        assert!(event.current().is_some());

        let deleted = MutationEvent::Deleted {
            collection: "tasks".into(),
            id: "T1".into(),
            previous: record("T1"),
        };
        assert!(deleted.current().is_none());
        assert_eq!(deleted.kind().to_string(), "deleted");
    }

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let first = bus.subscribe(move |e| sink.lock().push(format!("a:{}", e.id())));
        let sink = seen.clone();
        bus.subscribe(move |e| sink.lock().push(format!("b:{}", e.id())));
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(&MutationEvent::Inserted {
            collection: "tasks".into(),
            id: "T1".into(),
            current: record("T1"),
        });
        assert_eq!(*seen.lock(), vec!["a:T1", "b:T1"]);

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.emit(&MutationEvent::Deleted {
            collection: "tasks".into(),
            id: "T2".into(),
            previous: record("T2"),
        });
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(seen.lock()[2], "b:T2");
    }
}
