//! Live, ordered message view of one conversation.

use std::sync::Arc;
use std::time::Duration;

use doc_store::{Direction, DocumentStore, Query, QuerySnapshot, WatchTarget};
use tracing::debug;

use crate::config::SyncConfig;
use crate::echo::EchoBuffer;
use crate::live_view::{LiveView, Projection, ViewEvent};
use crate::reconcile::{build_view, match_echoes, MessageLog};
use crate::types::{fields, ConversationId, DisplayMessage, Message};

/// Subscription to a conversation's messages, ascending by `createdAt`,
/// with this scope's pending echoes merged in.
///
/// The stream has no terminal state while open. Store-side teardown shows
/// up as [`ViewEvent::TransientError`] and the stream resubscribes.
pub struct MessageStream {
    store: Arc<dyn DocumentStore>,
    conversation_id: ConversationId,
    echoes: EchoBuffer,
    config: SyncConfig,
    view: LiveView<DisplayMessage>,
}

impl MessageStream {
    /// Opens a stream for `conversation_id`. Must be called inside a Tokio
    /// runtime.
    pub fn open(
        store: Arc<dyn DocumentStore>,
        conversation_id: ConversationId,
        echoes: EchoBuffer,
        config: SyncConfig,
    ) -> Self {
        let view = spawn_view(&store, &conversation_id, &echoes, &config);
        Self {
            store,
            conversation_id,
            echoes,
            config,
            view,
        }
    }

    /// Switches to another conversation, closing the current subscription.
    pub fn reopen(&mut self, conversation_id: ConversationId) {
        self.view.close();
        self.conversation_id = conversation_id;
        self.view = spawn_view(&self.store, &self.conversation_id, &self.echoes, &self.config);
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub async fn next(&mut self) -> Option<ViewEvent<DisplayMessage>> {
        self.view.next().await
    }

    pub fn try_next(&mut self) -> Option<ViewEvent<DisplayMessage>> {
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

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("conversation_id", &self.conversation_id)
            .field("view", &self.view)
            .finish()
    }
}

fn spawn_view(
    store: &Arc<dyn DocumentStore>,
    conversation_id: &ConversationId,
    echoes: &EchoBuffer,
    config: &SyncConfig,
) -> LiveView<DisplayMessage> {
    let query = Query::new(conversation_id.messages_path()).order_by(fields::CREATED_AT, Direction::Asc);
    let projection = MessageProjection {
        conversation_id: conversation_id.clone(),
        log: MessageLog::new(),
        echoes: echoes.clone(),
        window: config.echo_match_window,
    };

    debug!(conversation_id = %conversation_id, "opening message stream");
    LiveView::spawn(
        store.clone(),
        WatchTarget::Query(query),
        config.subscription_retry,
        projection,
        Some(echoes.subscribe()),
    )
}

struct MessageProjection {
    conversation_id: ConversationId,
    log: MessageLog,
    echoes: EchoBuffer,
    window: Duration,
}

impl Projection for MessageProjection {
    type Item = DisplayMessage;

    fn apply(&mut self, snapshot: QuerySnapshot) {
        let total = snapshot.documents.len();
        let decoded: Vec<Message> = snapshot
            .documents
            .iter()
            .filter_map(|doc| Message::from_document(&self.conversation_id, doc))
            .collect();

        if decoded.len() != total {
            debug!(
                conversation_id = %self.conversation_id,
                skipped = total - decoded.len(),
                "skipped undecodable message documents"
            );
        }

        self.log.merge(decoded);
        self.echoes.observe(&self.conversation_id, self.log.ids());
    }

    fn render(&mut self) -> Vec<DisplayMessage> {
        let echoes = self.echoes.pending_for(&self.conversation_id);
        let matched = match_echoes(self.log.ordered(), &echoes, self.window);

        let absorbed: Vec<_> = matched.iter().map(|m| m.local_id).collect();
        self.echoes.retire(&absorbed);

        build_view(self.log.ordered(), &echoes, &matched)
    }
}
