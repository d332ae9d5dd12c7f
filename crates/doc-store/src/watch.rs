//! Live subscriptions over queries and single documents.
//!
//! Every subscription starts with an initial snapshot, even when nothing
//! matches, and then receives a fresh snapshot each time its result set
//! changes. Watchers are notified only after a write has been committed.
//! A stream that ends (`None`) was torn down by the store side. The
//! subscriber decides whether to resubscribe.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::{DocPath, Document, Query, QuerySnapshot, StoreError, Timestamp};

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Query(Query),
    Document(DocPath),
}

impl WatchTarget {
    /// Computes this target's current result set from the given documents.
    pub fn evaluate<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        match self {
            WatchTarget::Query(query) => query.evaluate(docs),
            WatchTarget::Document(path) => docs
                .into_iter()
                .filter(|doc| &doc.path == path)
                .cloned()
                .collect(),
        }
    }
}

/// An event delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Snapshot(QuerySnapshot),
    Error(StoreError),
}

/// Receiving end of a live subscription.
pub struct SnapshotStream {
    target: WatchTarget,
    receiver: mpsc::UnboundedReceiver<WatchEvent>,
}

impl SnapshotStream {
    pub fn new(target: WatchTarget, receiver: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { target, receiver }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Waits for the next event. Returns None once the store tears the
    /// subscription down or after [`close`](Self::close).
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }

    /// Returns an already-buffered event without waiting.
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stops delivery. Calling this more than once has no further effect.
    pub fn close(&mut self) {
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }
}

impl Stream for SnapshotStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

struct Watcher {
    target: WatchTarget,
    sender: mpsc::UnboundedSender<WatchEvent>,
    last_sent: Option<Vec<Document>>,
}

/// Fan-out of committed changes to live subscriptions.
///
/// Senders whose stream has been dropped or closed are pruned on the next
/// notification.
#[derive(Default)]
pub struct WatchHub {
    watchers: Vec<Watcher>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription and delivers its initial snapshot.
    pub fn subscribe<'a>(
        &mut self,
        target: WatchTarget,
        docs: impl IntoIterator<Item = &'a Document>,
        read_at: Timestamp,
    ) -> SnapshotStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let documents = target.evaluate(docs);

        let _ = sender.send(WatchEvent::Snapshot(QuerySnapshot {
            documents: documents.clone(),
            read_at,
        }));

        self.watchers.push(Watcher {
            target: target.clone(),
            sender,
            last_sent: Some(documents),
        });

        SnapshotStream::new(target, receiver)
    }

    /// Re-evaluates every subscription against the committed documents and
    /// pushes a snapshot to those whose result set changed.
    pub fn notify<'a, I>(&mut self, docs: impl Fn() -> I, read_at: Timestamp)
    where
        I: IntoIterator<Item = &'a Document>,
    {
        self.watchers.retain_mut(|watcher| {
            if watcher.sender.is_closed() {
                return false;
            }
            let documents = watcher.target.evaluate(docs());
            if watcher.last_sent.as_ref() == Some(&documents) {
                return true;
            }
            let event = WatchEvent::Snapshot(QuerySnapshot {
                documents: documents.clone(),
                read_at,
            });
            watcher.last_sent = Some(documents);
            watcher.sender.send(event).is_ok()
        });
    }

    /// Delivers an error to every subscription and then drops them all.
    pub fn fail_all(&mut self, error: StoreError) {
        for watcher in self.watchers.drain(..) {
            let _ = watcher.sender.send(WatchEvent::Error(error.clone()));
        }
    }

    /// Drops every subscription without an error; their streams end.
    pub fn disconnect_all(&mut self) {
        self.watchers.clear();
    }

    /// Number of registered subscriptions, including ones not yet pruned.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}
