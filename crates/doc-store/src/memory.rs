//! In-memory [`DocumentStore`] adapter.
//!
//! Behaves like the hosted store as far as the sync core can observe:
//! generated ids, merge upserts, idempotent deletes, ordered queries, and
//! live subscriptions that start with an initial snapshot. Commit times
//! come from a strictly monotonic server clock, so no two writes share a
//! timestamp.
//!
//! Tests drive failure paths through the fault plan ([`fail_next`],
//! [`fail_always`]), the write gates ([`hold`], [`release`]) and watcher
//! teardown ([`disconnect_watchers`], [`fail_watchers`]).
//!
//! [`fail_next`]: InMemoryStore::fail_next
//! [`fail_always`]: InMemoryStore::fail_always
//! [`hold`]: InMemoryStore::hold
//! [`release`]: InMemoryStore::release
//! [`disconnect_watchers`]: InMemoryStore::disconnect_watchers
//! [`fail_watchers`]: InMemoryStore::fail_watchers

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::journal::{NullSink, StoreEvent, StoreEventSink};
use crate::watch::WatchHub;
use crate::{
    CollectionPath, DocPath, Document, DocumentStore, Query, QuerySnapshot, SnapshotStream,
    StoreError, StoreResult, Timestamp, WatchTarget, WriteFields,
};

/// A store operation, as addressed by fault injection and write gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Upsert,
    Delete,
    Query,
    Subscribe,
}

#[derive(Debug, Clone)]
struct Fault {
    /// None fails every call until cleared.
    remaining: Option<u32>,
    error: StoreError,
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<CollectionPath, BTreeMap<String, Document>>,
    last_commit: i64,
    hub: WatchHub,
}

impl StoreState {
    /// Advances the server clock; never returns the same value twice.
    fn tick(&mut self) -> Timestamp {
        let now = Utc::now().timestamp_micros();
        self.last_commit = now.max(self.last_commit + 1);
        Timestamp::from_micros(self.last_commit)
    }

    fn read_time(&self) -> Timestamp {
        Timestamp::from_micros(Utc::now().timestamp_micros().max(self.last_commit))
    }

    fn publish(&mut self, read_at: Timestamp) {
        let StoreState {
            collections, hub, ..
        } = self;
        hub.notify(|| collections.values().flat_map(BTreeMap::values), read_at);
    }
}

/// Document store held entirely in memory.
pub struct InMemoryStore<S: StoreEventSink = NullSink> {
    state: Mutex<StoreState>,
    faults: Mutex<HashMap<StoreOp, Fault>>,
    held: watch::Sender<HashSet<StoreOp>>,
    waiting: Mutex<HashMap<StoreOp, usize>>,
    sink: S,
}

impl<S: StoreEventSink> InMemoryStore<S> {
    /// Creates an empty store that reports committed writes to `sink`.
    pub fn new(sink: S) -> Self {
        let (held, _) = watch::channel(HashSet::new());
        Self {
            state: Mutex::new(StoreState::default()),
            faults: Mutex::new(HashMap::new()),
            held,
            waiting: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Returns the write journal sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Fails the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: StoreOp, times: u32, error: StoreError) {
        if times == 0 {
            self.faults.lock().remove(&op);
            return;
        }
        self.faults.lock().insert(
            op,
            Fault {
                remaining: Some(times),
                error,
            },
        );
    }

    /// Fails every call of `op` with `error` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: StoreOp, error: StoreError) {
        self.faults.lock().insert(
            op,
            Fault {
                remaining: None,
                error,
            },
        );
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Parks calls of `op` before they commit until [`release`](Self::release).
    pub fn hold(&self, op: StoreOp) {
        self.held.send_modify(|held| {
            held.insert(op);
        });
    }

    /// Lets parked calls of `op` proceed.
    pub fn release(&self, op: StoreOp) {
        self.held.send_modify(|held| {
            held.remove(&op);
        });
    }

    /// Number of calls of `op` currently parked by [`hold`](Self::hold).
    pub fn waiting(&self, op: StoreOp) -> usize {
        self.waiting.lock().get(&op).copied().unwrap_or(0)
    }

    /// Ends every live subscription as if the connection dropped.
    pub fn disconnect_watchers(&self) {
        self.state.lock().hub.disconnect_all();
    }

    /// Delivers `error` to every live subscription, then ends them.
    pub fn fail_watchers(&self, error: StoreError) {
        self.state.lock().hub.fail_all(error);
    }

    pub fn watcher_count(&self) -> usize {
        self.state.lock().hub.watcher_count()
    }

    /// Reads a document directly, bypassing faults and gates.
    pub fn peek(&self, path: &DocPath) -> Option<Document> {
        self.state
            .lock()
            .collections
            .get(path.parent())
            .and_then(|docs| docs.get(path.id()))
            .cloned()
    }

    /// Number of documents in a collection, bypassing faults and gates.
    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn admit(&self, op: StoreOp) -> StoreResult<()> {
        self.wait_if_held(op).await;
        self.check_fault(op)
    }

    async fn wait_if_held(&self, op: StoreOp) {
        let mut held = self.held.subscribe();
        let is_held = held.borrow().contains(&op);
        if !is_held {
            return;
        }

        *self.waiting.lock().entry(op).or_default() += 1;
        let _ = held.wait_for(|held| !held.contains(&op)).await;
        if let Some(count) = self.waiting.lock().get_mut(&op) {
            *count = count.saturating_sub(1);
        }
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        let Some(fault) = faults.get_mut(&op) else {
            return Ok(());
        };

        let error = fault.error.clone();
        let exhausted = match &mut fault.remaining {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            faults.remove(&op);
        }

        debug!(?op, error = %error, "injected store fault");
        Err(error)
    }
}

impl Default for InMemoryStore<NullSink> {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

#[async_trait]
impl<S: StoreEventSink + 'static> DocumentStore for InMemoryStore<S> {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        path.validate()?;
        self.admit(StoreOp::Get).await?;
        Ok(self.peek(path))
    }

    async fn create(&self, collection: &CollectionPath, fields: WriteFields) -> StoreResult<String> {
        collection.validate()?;
        self.admit(StoreOp::Create).await?;

        let mut state = self.state.lock();
        let committed_at = state.tick();
        let id = Uuid::new_v4().simple().to_string();
        let path = collection.doc(id.clone());

        state
            .collections
            .entry(collection.clone())
            .or_default()
            .insert(id.clone(), Document::new(path.clone(), fields.resolve(committed_at)));
        state.publish(committed_at);

        debug!(path = %path, "document created");
        self.sink.emit(StoreEvent::Created { path });
        Ok(id)
    }

    async fn upsert(&self, path: &DocPath, fields: WriteFields) -> StoreResult<()> {
        path.validate()?;
        self.admit(StoreOp::Upsert).await?;

        let mut state = self.state.lock();
        let committed_at = state.tick();
        let resolved = fields.resolve(committed_at);

        let docs = state.collections.entry(path.parent().clone()).or_default();
        let created = match docs.get_mut(path.id()) {
            Some(existing) => {
                existing.fields.extend(resolved);
                false
            }
            None => {
                docs.insert(
                    path.id().to_string(),
                    Document::new(path.clone(), resolved),
                );
                true
            }
        };
        state.publish(committed_at);

        debug!(path = %path, created, "document upserted");
        self.sink.emit(StoreEvent::Upserted {
            path: path.clone(),
            created,
        });
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        path.validate()?;
        self.admit(StoreOp::Delete).await?;

        let mut state = self.state.lock();
        let removed = state
            .collections
            .get_mut(path.parent())
            .and_then(|docs| docs.remove(path.id()));

        if removed.is_none() {
            debug!(path = %path, "delete of absent document");
            return Ok(());
        }

        let committed_at = state.tick();
        state.publish(committed_at);

        debug!(path = %path, "document deleted");
        self.sink.emit(StoreEvent::Deleted { path: path.clone() });
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<QuerySnapshot> {
        query.collection.validate()?;
        self.admit(StoreOp::Query).await?;

        let state = self.state.lock();
        let documents = state
            .collections
            .get(&query.collection)
            .map(|docs| query.evaluate(docs.values()))
            .unwrap_or_default();

        Ok(QuerySnapshot {
            documents,
            read_at: state.read_time(),
        })
    }

    async fn subscribe(&self, target: WatchTarget) -> StoreResult<SnapshotStream> {
        match &target {
            WatchTarget::Query(query) => query.collection.validate()?,
            WatchTarget::Document(path) => path.validate()?,
        }
        self.admit(StoreOp::Subscribe).await?;

        let mut state = self.state.lock();
        let read_at = state.read_time();
        let StoreState {
            collections, hub, ..
        } = &mut *state;

        let stream = hub.subscribe(
            target,
            collections.values().flat_map(BTreeMap::values),
            read_at,
        );
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingSink;
    use crate::{Direction, Filter, WatchEvent};
    use serde_json::json;

    fn chats() -> CollectionPath {
        CollectionPath::root("chats")
    }

    #[tokio::test]
    async fn create_assigns_id_and_server_timestamp() {
        let store = InMemoryStore::new(NullSink);
        let messages = chats().doc("c1").child("messages");

        let id = store
            .create(
                &messages,
                WriteFields::new()
                    .set("text", "hi")
                    .server_timestamp("createdAt"),
            )
            .await
            .unwrap();

        let doc = store.get(&messages.doc(id)).await.unwrap().unwrap();
        assert_eq!(doc.str_field("text"), Some("hi"));
        assert!(doc.timestamp("createdAt").is_some());
    }

    #[tokio::test]
    async fn server_clock_is_strictly_monotonic() {
        let store = InMemoryStore::new(NullSink);
        let messages = chats().doc("c1").child("messages");

        let mut stamps = Vec::new();
        for i in 0..20 {
            let id = store
                .create(
                    &messages,
                    WriteFields::new().set("n", i).server_timestamp("createdAt"),
                )
                .await
                .unwrap();
            stamps.push(store.peek(&messages.doc(id)).unwrap().timestamp("createdAt").unwrap());
        }

        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn upsert_merges_and_creates() {
        let store = InMemoryStore::new(RecordingSink::new());
        let chat = chats().doc("c1");

        store
            .upsert(&chat, WriteFields::new().set("participants", json!(["a", "b"])))
            .await
            .unwrap();
        store
            .upsert(
                &chat,
                WriteFields::new()
                    .set("lastMessage", "hi")
                    .server_timestamp("updatedAt"),
            )
            .await
            .unwrap();

        let doc = store.peek(&chat).unwrap();
        assert_eq!(doc.string_array("participants").unwrap(), vec!["a", "b"]);
        assert_eq!(doc.str_field("lastMessage"), Some("hi"));

        let events = store.sink().events();
        assert_eq!(
            events,
            vec![
                StoreEvent::Upserted {
                    path: chat.clone(),
                    created: true
                },
                StoreEvent::Upserted {
                    path: chat,
                    created: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new(RecordingSink::new());
        let fav = CollectionPath::root("users").doc("u1").child("favorites").doc("l1");

        store.upsert(&fav, WriteFields::new().set("title", "Loft")).await.unwrap();
        store.delete(&fav).await.unwrap();
        store.delete(&fav).await.unwrap();

        assert!(store.peek(&fav).is_none());
        assert_eq!(store.sink().len(), 2);
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = InMemoryStore::new(NullSink);
        for (id, members) in [("c1", json!(["a", "b"])), ("c2", json!(["b", "c"])), ("c3", json!(["a", "c"]))] {
            store
                .upsert(
                    &chats().doc(id),
                    WriteFields::new()
                        .set("participants", members)
                        .server_timestamp("updatedAt"),
                )
                .await
                .unwrap();
        }

        let query = Query::new(chats())
            .filter(Filter::array_contains("participants", "a"))
            .order_by("updatedAt", Direction::Desc);
        let ids: Vec<_> = store
            .query(&query)
            .await
            .unwrap()
            .documents
            .iter()
            .map(|d| d.id().to_string())
            .collect();

        assert_eq!(ids, vec!["c3", "c1"]);
    }

    #[tokio::test]
    async fn fail_next_expires_after_count() {
        let store = InMemoryStore::new(NullSink);
        let chat = chats().doc("c1");
        store.fail_next(StoreOp::Get, 2, StoreError::Unavailable("offline".into()));

        assert!(store.get(&chat).await.is_err());
        assert!(store.get(&chat).await.is_err());
        assert_eq!(store.get(&chat).await, Ok(None));
    }

    #[tokio::test]
    async fn fail_always_until_cleared() {
        let store = InMemoryStore::new(NullSink);
        store.fail_always(StoreOp::Query, StoreError::PermissionDenied("rules".into()));

        for _ in 0..3 {
            assert_eq!(
                store.query(&Query::new(chats())).await.unwrap_err(),
                StoreError::PermissionDenied("rules".into())
            );
        }
        store.clear_faults();
        assert!(store.query(&Query::new(chats())).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_and_change_snapshots() {
        let store = InMemoryStore::new(NullSink);
        let query = Query::new(chats()).order_by("updatedAt", Direction::Desc);
        let mut stream = store.subscribe(WatchTarget::Query(query)).await.unwrap();

        match stream.next().await {
            Some(WatchEvent::Snapshot(snapshot)) => assert!(snapshot.is_empty()),
            other => panic!("expected initial snapshot, got {other:?}"),
        }

        store
            .upsert(&chats().doc("c1"), WriteFields::new().server_timestamp("updatedAt"))
            .await
            .unwrap();

        match stream.next().await {
            Some(WatchEvent::Snapshot(snapshot)) => assert_eq!(snapshot.len(), 1),
            other => panic!("expected change snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_ends_streams() {
        let store = InMemoryStore::new(NullSink);
        let mut stream = store
            .subscribe(WatchTarget::Document(chats().doc("c1")))
            .await
            .unwrap();
        let _initial = stream.next().await;

        store.disconnect_watchers();
        assert!(stream.next().await.is_none());
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn held_writes_wait_for_release() {
        let store = std::sync::Arc::new(InMemoryStore::new(NullSink));
        let chat = chats().doc("c1");
        store.hold(StoreOp::Upsert);

        let writer = {
            let store = store.clone();
            let chat = chat.clone();
            tokio::spawn(async move { store.upsert(&chat, WriteFields::new().set("x", 1)).await })
        };

        while store.waiting(StoreOp::Upsert) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(store.peek(&chat).is_none());

        store.release(StoreOp::Upsert);
        writer.await.unwrap().unwrap();
        assert!(store.peek(&chat).is_some());
        assert_eq!(store.waiting(StoreOp::Upsert), 0);
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected() {
        let store = InMemoryStore::new(NullSink);
        let err = store
            .create(&CollectionPath::root(""), WriteFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
