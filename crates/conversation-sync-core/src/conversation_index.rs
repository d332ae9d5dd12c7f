//! Live, recency-ordered list of the conversations a user participates in.

use std::sync::Arc;

use doc_store::{Direction, DocumentStore, Filter, Query, QuerySnapshot, WatchTarget};
use doc_store::CollectionPath;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::directory::ConversationDirectory;
use crate::live_view::{LiveView, Projection, ViewEvent};
use crate::types::{fields, ConversationSummary, UserId, CHATS_COLLECTION};

/// Subscription to a user's inbox, newest `updatedAt` first.
///
/// Every delivered list contains only conversations whose participants
/// include the user the index was opened for. Reopening for another user
/// starts from an empty result set; nothing carries over.
pub struct ConversationIndex {
    store: Arc<dyn DocumentStore>,
    user_id: UserId,
    config: SyncConfig,
    directory: Option<ConversationDirectory>,
    view: LiveView<ConversationSummary>,
}

impl ConversationIndex {
    /// Opens the index for `user_id`. Must be called inside a Tokio runtime.
    pub fn open(store: Arc<dyn DocumentStore>, user_id: UserId, config: SyncConfig) -> Self {
        let view = spawn_view(&store, &user_id, &config, None);
        Self {
            store,
            user_id,
            config,
            directory: None,
            view,
        }
    }

    /// Like [`open`](Self::open), seeding `directory` with participants from
    /// every snapshot.
    pub fn open_with_directory(
        store: Arc<dyn DocumentStore>,
        user_id: UserId,
        config: SyncConfig,
        directory: ConversationDirectory,
    ) -> Self {
        let view = spawn_view(&store, &user_id, &config, Some(directory.clone()));
        Self {
            store,
            user_id,
            config,
            directory: Some(directory),
            view,
        }
    }

    /// Replaces the subscription with one for `user_id`. Events buffered
    /// for the previous user are discarded.
    pub fn reopen(&mut self, user_id: UserId) {
        self.view.close();
        self.user_id = user_id;
        self.view = spawn_view(&self.store, &self.user_id, &self.config, self.directory.clone());
    }

    /// The user this index is currently open for.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn next(&mut self) -> Option<ViewEvent<ConversationSummary>> {
        self.view.next().await
    }

    pub fn try_next(&mut self) -> Option<ViewEvent<ConversationSummary>> {
        self.view.try_next()
    }

    pub fn retry(&self) {
        self.view.retry();
    }

    /// Releases the subscription. Idempotent.
    pub fn close(&mut self) {
        self.view.close();
    }

    pub fn is_closed(&self) -> bool {
        self.view.is_closed()
    }
}

impl std::fmt::Debug for ConversationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationIndex")
            .field("user_id", &self.user_id)
            .field("view", &self.view)
            .finish()
    }
}

fn spawn_view(
    store: &Arc<dyn DocumentStore>,
    user_id: &UserId,
    config: &SyncConfig,
    directory: Option<ConversationDirectory>,
) -> LiveView<ConversationSummary> {
    let query = Query::new(CollectionPath::root(CHATS_COLLECTION))
        .filter(Filter::array_contains(fields::PARTICIPANTS, user_id.as_str()))
        .order_by(fields::UPDATED_AT, Direction::Desc);

    debug!(user_id = %user_id, "opening conversation index");
    LiveView::spawn(
        store.clone(),
        WatchTarget::Query(query),
        config.subscription_retry,
        IndexProjection {
            user_id: user_id.clone(),
            conversations: Vec::new(),
            directory,
        },
        None,
    )
}

struct IndexProjection {
    user_id: UserId,
    conversations: Vec<ConversationSummary>,
    directory: Option<ConversationDirectory>,
}

impl Projection for IndexProjection {
    type Item = ConversationSummary;

    fn apply(&mut self, snapshot: QuerySnapshot) {
        let mut conversations: Vec<ConversationSummary> = snapshot
            .documents
            .iter()
            .map(ConversationSummary::from_document)
            .filter(|summary| {
                let member = summary.includes(&self.user_id);
                if !member {
                    warn!(
                        user_id = %self.user_id,
                        conversation_id = %summary.id,
                        "dropping conversation that does not list the user"
                    );
                }
                member
            })
            .collect();

        sort_by_recency(&mut conversations);

        if let Some(directory) = &self.directory {
            for summary in &conversations {
                directory.register(summary);
            }
        }
        self.conversations = conversations;
    }

    fn render(&mut self) -> Vec<ConversationSummary> {
        self.conversations.clone()
    }
}

/// Newest `updatedAt` first; conversations without one sort last; ties by id.
pub fn sort_by_recency(conversations: &mut [ConversationSummary]) {
    conversations.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationId;
    use doc_store::{Document, Timestamp};
    use serde_json::json;

    fn chat(id: &str, participants: &[&str], updated_at: Option<i64>) -> Document {
        let mut fields = serde_json::Map::new();
        fields.insert("participants".into(), json!(participants));
        if let Some(at) = updated_at {
            fields.insert("updatedAt".into(), json!(at));
        }
        Document::new(ConversationId::from(id).doc_path(), fields)
    }

    #[test]
    fn foreign_conversations_are_filtered_out() {
        let mut projection = IndexProjection {
            user_id: UserId::from("alice"),
            conversations: Vec::new(),
            directory: None,
        };
        projection.apply(QuerySnapshot {
            documents: vec![
                chat("c1", &["alice", "bob"], Some(1)),
                chat("c2", &["bob", "carol"], Some(2)),
            ],
            read_at: Timestamp::from_micros(0),
        });

        let ids: Vec<_> = projection.render().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![ConversationId::from("c1")]);
    }

    #[test]
    fn snapshot_order_is_not_trusted() {
        let mut projection = IndexProjection {
            user_id: UserId::from("alice"),
            conversations: Vec::new(),
            directory: None,
        };
        projection.apply(QuerySnapshot {
            documents: vec![
                chat("old", &["alice", "bob"], Some(1)),
                chat("new", &["alice", "carol"], Some(9)),
                chat("mid", &["alice", "dave"], Some(5)),
            ],
            read_at: Timestamp::from_micros(0),
        });

        let ids: Vec<_> = projection
            .render()
            .into_iter()
            .map(|c| c.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn recency_sort_puts_unset_last() {
        let mut list = vec![
            ConversationSummary::from_document(&chat("a", &["x", "y"], None)),
            ConversationSummary::from_document(&chat("b", &["x", "y"], Some(3))),
        ];
        sort_by_recency(&mut list);
        assert_eq!(list[0].id.as_str(), "b");
    }
}
