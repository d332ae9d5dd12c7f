//! # doc-store
//!
//! The remote document store contract used by the conversation sync core,
//! plus an in-memory adapter that implements it.
//!
//! ## Contract
//!
//! | Operation   | Semantics                                              |
//! |-------------|--------------------------------------------------------|
//! | `get`       | point read, `None` when absent                         |
//! | `create`    | insert with a store-generated id                       |
//! | `upsert`    | merge fields, creating the document if absent          |
//! | `delete`    | idempotent delete                                      |
//! | `query`     | equality / array-contains filters, single-field order  |
//! | `subscribe` | live snapshots, starting with an initial one           |
//!
//! Writes may carry [`WriteValue::ServerTimestamp`] placeholders. The store
//! resolves them to its own commit time, never the caller's clock.

mod error;
mod journal;
mod memory;
mod path;
mod query;
mod value;
mod watch;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use journal::{NullSink, RecordingSink, StoreEvent, StoreEventSink};
pub use memory::{InMemoryStore, StoreOp};
pub use path::{CollectionPath, DocPath};
pub use query::{compare_values, Direction, Filter, OrderBy, Query, QuerySnapshot};
pub use value::{Document, Timestamp, WriteFields, WriteValue};
pub use watch::{SnapshotStream, WatchEvent, WatchHub, WatchTarget};

/// Read, write, and subscribe access to a remote document store.
///
/// Every call is a suspension point. Two calls issued independently have no
/// ordering guarantee relative to each other.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document.
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    /// Inserts a document under a generated id and returns that id.
    async fn create(&self, collection: &CollectionPath, fields: WriteFields) -> StoreResult<String>;

    /// Merges fields into a document, creating it when absent.
    async fn upsert(&self, path: &DocPath, fields: WriteFields) -> StoreResult<()>;

    /// Deletes a document. Deleting an absent document succeeds.
    async fn delete(&self, path: &DocPath) -> StoreResult<()>;

    /// Runs a one-shot query.
    async fn query(&self, query: &Query) -> StoreResult<QuerySnapshot>;

    /// Opens a live subscription.
    async fn subscribe(&self, target: WatchTarget) -> StoreResult<SnapshotStream>;
}
