//! Behaviour tests for the sync core, run against the in-memory store.
//!
//! - `ordering.rs` - Rules 1-4 (message order in a stream)
//! - `echoes.rs` - Rules 1-6 (optimistic echoes and their reconciliation)
//! - `inbox.rs` - Rules 1-4 (conversation index membership and recency)
//! - `sends.rs` - Rules 1-6 (two-phase send outcomes)
//! - `failures.rs` - Rules 1-7 (partial writes, retries, stalled views)
//! - `lifecycle.rs` - Rules 1-7 (scope ownership, close, teardown)

mod failures;
mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use doc_store::{DocumentStore, InMemoryStore, RecordingSink};

use crate::backoff::RetryPolicy;
use crate::composer::Composer;
use crate::config::SyncConfig;
use crate::conversation_index::ConversationIndex;
use crate::directory::ConversationDirectory;
use crate::live_view::ViewEvent;
use crate::message_stream::MessageStream;
use crate::session::SessionContext;
use crate::types::{ConversationId, ConversationSummary, DisplayMessage, UserId};

const WAIT: Duration = Duration::from_secs(10);

/// Short retry delays so paused-clock tests advance quickly.
pub(crate) fn fast_config() -> SyncConfig {
    let policy = |max_attempts| RetryPolicy {
        base: Duration::from_millis(10),
        max: Duration::from_millis(80),
        max_attempts,
    };
    SyncConfig {
        echo_match_window: Duration::from_secs(60),
        send_retry: policy(3),
        summary_retry: policy(4),
        subscription_retry: policy(3),
    }
}

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore<RecordingSink>>,
    pub dyn_store: Arc<dyn DocumentStore>,
    pub directory: ConversationDirectory,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new(RecordingSink::new()));
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let directory = ConversationDirectory::new(dyn_store.clone());
        Self {
            store,
            dyn_store,
            directory,
        }
    }

    pub fn composer(&self) -> Composer {
        Composer::new(self.dyn_store.clone(), self.directory.clone(), fast_config())
    }

    /// Starts the conversation between `a` and `b`.
    pub async fn conversation(&self, a: &str, b: &str) -> ConversationId {
        self.directory
            .start_conversation(&SessionContext::new(a), &UserId::from(b))
            .await
            .unwrap()
    }

    pub fn stream(&self, conversation_id: &ConversationId) -> MessageStream {
        MessageStream::open(
            self.dyn_store.clone(),
            conversation_id.clone(),
            crate::echo::EchoBuffer::new(),
            fast_config(),
        )
    }

    pub fn index(&self, user: &str) -> ConversationIndex {
        ConversationIndex::open(self.dyn_store.clone(), UserId::from(user), fast_config())
    }
}

/// Reads snapshots until one satisfies `pred`.
pub(crate) async fn messages_until(
    stream: &mut MessageStream,
    pred: impl Fn(&[DisplayMessage]) -> bool,
) -> Vec<DisplayMessage> {
    let read = async {
        loop {
            match stream.next().await {
                Some(ViewEvent::Snapshot(items)) if pred(items.as_slice()) => return items,
                Some(_) => continue,
                None => panic!("message stream closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, read)
        .await
        .expect("timed out waiting for message view")
}

/// Reads snapshots until one satisfies `pred`.
pub(crate) async fn inbox_until(
    index: &mut ConversationIndex,
    pred: impl Fn(&[ConversationSummary]) -> bool,
) -> Vec<ConversationSummary> {
    let read = async {
        loop {
            match index.next().await {
                Some(ViewEvent::Snapshot(items)) if pred(items.as_slice()) => return items,
                Some(_) => continue,
                None => panic!("conversation index closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, read)
        .await
        .expect("timed out waiting for inbox view")
}

pub(crate) fn texts(view: &[DisplayMessage]) -> Vec<&str> {
    view.iter().map(|m| m.text.as_str()).collect()
}

pub(crate) fn confirmed(view: &[DisplayMessage]) -> usize {
    view.iter().filter(|m| !m.is_pending()).count()
}

pub(crate) fn ids(view: &[ConversationSummary]) -> Vec<&str> {
    view.iter().map(|c| c.id.as_str()).collect()
}
