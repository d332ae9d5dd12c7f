//! Write journal for the in-memory store.
//!
//! Events are emitted after a write has been committed. Writes that change
//! nothing (deleting an absent document) emit nothing.

use parking_lot::Mutex;

use crate::DocPath;

/// A committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A document was inserted with a store-generated id.
    Created { path: DocPath },
    /// A document was merged into, or created by an upsert.
    Upserted { path: DocPath, created: bool },
    /// A document was removed.
    Deleted { path: DocPath },
}

impl StoreEvent {
    pub fn path(&self) -> &DocPath {
        match self {
            StoreEvent::Created { path }
            | StoreEvent::Upserted { path, .. }
            | StoreEvent::Deleted { path } => path,
        }
    }
}

/// Receives committed-write events from the store.
pub trait StoreEventSink: Send + Sync {
    fn emit(&self, event: StoreEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl StoreEventSink for NullSink {
    fn emit(&self, _event: StoreEvent) {}
}

/// Keeps every event in memory so tests can count writes.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StoreEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events whose path lies under the given prefix.
    pub fn count_under(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.path().to_string().starts_with(prefix))
            .count()
    }
}

impl StoreEventSink for RecordingSink {
    fn emit(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}
