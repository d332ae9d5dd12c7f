//! Scope ownership for live subscriptions.
//!
//! The manager owns at most one inbox ([`ConversationIndex`]) and at most
//! one chat scope ([`ChatScope`]) at a time. Opening a different target in
//! a scope closes what that scope held before. Starting a new session tears
//! everything down first, so nothing computed for the previous user is
//! delivered afterwards.
//!
//! Everything that opens a subscription must run inside a Tokio runtime.

use std::sync::Arc;

use doc_store::DocumentStore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::composer::{validate_text, Composer, SendReceipt, StaleSummaries};
use crate::config::SyncConfig;
use crate::conversation_index::ConversationIndex;
use crate::directory::ConversationDirectory;
use crate::echo::EchoBuffer;
use crate::error::{ChatSyncResult, ValidationError};
use crate::favorites::Favorites;
use crate::live_view::ViewEvent;
use crate::message_stream::MessageStream;
use crate::session::SessionContext;
use crate::types::{ConversationId, DisplayMessage, UserId};

/// Owns the live subscriptions of one signed-in client.
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    config: SyncConfig,
    directory: ConversationDirectory,
    stale: StaleSummaries,
    session: Option<SessionContext>,
    inbox: Option<ConversationIndex>,
    chat: Option<ChatScope>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: SyncConfig) -> Self {
        let directory = ConversationDirectory::new(store.clone());
        Self {
            store,
            config,
            directory,
            stale: StaleSummaries::new(),
            session: None,
            inbox: None,
            chat: None,
        }
    }

    /// Tears down every scope of the previous session, then opens the inbox
    /// for the new user.
    pub fn start_session(&mut self, session: SessionContext) -> &mut ConversationIndex {
        self.teardown();
        info!(user_id = %session.user_id(), "session started");

        self.directory = ConversationDirectory::new(self.store.clone());
        let index = ConversationIndex::open_with_directory(
            self.store.clone(),
            session.user_id().clone(),
            self.config.clone(),
            self.directory.clone(),
        );
        self.session = Some(session);
        self.inbox.insert(index)
    }

    /// Tears down every scope and forgets the session.
    pub fn end_session(&mut self) {
        self.teardown();
        if let Some(session) = self.session.take() {
            info!(user_id = %session.user_id(), "session ended");
        }
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    fn require_session(&self) -> ChatSyncResult<&SessionContext> {
        Ok(self.session.as_ref().ok_or(ValidationError::NoSession)?)
    }

    /// Opens the inbox for the session user, reusing it if already open.
    pub fn open_inbox(&mut self) -> ChatSyncResult<&mut ConversationIndex> {
        let user_id = self.require_session()?.user_id().clone();

        let reusable = matches!(
            &self.inbox,
            Some(index) if index.user_id() == &user_id && !index.is_closed()
        );
        if !reusable {
            self.close_inbox();
            let index = ConversationIndex::open_with_directory(
                self.store.clone(),
                user_id,
                self.config.clone(),
                self.directory.clone(),
            );
            self.inbox = Some(index);
        }

        self.inbox
            .as_mut()
            .ok_or_else(|| ValidationError::NoSession.into())
    }

    /// Closes the inbox. Idempotent.
    pub fn close_inbox(&mut self) {
        if let Some(mut index) = self.inbox.take() {
            index.close();
            debug!(user_id = %index.user_id(), "inbox closed");
        }
    }

    pub fn inbox_mut(&mut self) -> Option<&mut ConversationIndex> {
        self.inbox.as_mut()
    }

    /// Opens the chat scope for `conversation_id`, closing any other.
    ///
    /// Fails with `NotFound` if the conversation does not exist and with
    /// `NotParticipant` if the session user is not in it.
    pub async fn open_chat(&mut self, conversation_id: &ConversationId) -> ChatSyncResult<&mut ChatScope> {
        let user_id = self.require_session()?.user_id().clone();

        let reusable = matches!(
            &self.chat,
            Some(scope) if scope.conversation_id() == conversation_id
                && scope.user_id == user_id
                && !scope.is_closed()
        );
        if !reusable {
            let participants = self.directory.participants(conversation_id).await?;
            if !participants.contains(&user_id) {
                return Err(ValidationError::NotParticipant {
                    sender: user_id,
                    conversation_id: conversation_id.clone(),
                }
                .into());
            }

            self.close_chat();
            let scope = ChatScope::open(
                self.store.clone(),
                conversation_id.clone(),
                user_id,
                self.directory.clone(),
                self.stale.clone(),
                self.config.clone(),
            );
            self.chat = Some(scope);
        }

        self.chat.as_mut().ok_or_else(|| {
            crate::error::ChatSyncError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            }
        })
    }

    /// Closes the chat scope. Idempotent.
    pub fn close_chat(&mut self) {
        if let Some(mut scope) = self.chat.take() {
            scope.close();
        }
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatScope> {
        self.chat.as_mut()
    }

    /// Closes every scope. Sends already in flight still complete, but
    /// their results no longer reach any view. Idempotent.
    pub fn teardown(&mut self) {
        let had_scopes = self.inbox.is_some() || self.chat.is_some();
        self.close_chat();
        self.close_inbox();
        if had_scopes {
            debug!("subscription scopes torn down");
        }
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn stale_summaries(&self) -> &StaleSummaries {
        &self.stale
    }

    /// Saved listings of the session user.
    pub fn favorites(&self) -> ChatSyncResult<Favorites> {
        let session = self.require_session()?;
        Ok(Favorites::new(self.store.clone(), session.clone()))
    }

    /// Creates (or reuses) the conversation with `other`.
    pub async fn start_conversation(&self, other: &UserId) -> ChatSyncResult<ConversationId> {
        let session = self.require_session()?;
        self.directory.start_conversation(session, other).await
    }

    /// Rewrites every stale conversation summary from its newest message.
    pub async fn repair_stale_summaries(&self) -> ChatSyncResult<usize> {
        Composer::new(self.store.clone(), self.directory.clone(), self.config.clone())
            .with_stale_ledger(self.stale.clone())
            .repair_stale_summaries()
            .await
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("session", &self.session)
            .field("inbox", &self.inbox)
            .field("chat", &self.chat)
            .finish()
    }
}

/// A chat screen: the message stream, the composer sharing its echoes, and
/// the composition draft.
pub struct ChatScope {
    conversation_id: ConversationId,
    user_id: UserId,
    stream: MessageStream,
    composer: Composer,
    echoes: EchoBuffer,
    draft: String,
}

impl ChatScope {
    fn open(
        store: Arc<dyn DocumentStore>,
        conversation_id: ConversationId,
        user_id: UserId,
        directory: ConversationDirectory,
        stale: StaleSummaries,
        config: SyncConfig,
    ) -> Self {
        let echoes = EchoBuffer::new();
        let composer = Composer::new(store.clone(), directory, config.clone())
            .with_echoes(echoes.clone())
            .with_stale_ledger(stale);
        let stream = MessageStream::open(store, conversation_id.clone(), echoes.clone(), config);
        debug!(conversation_id = %conversation_id, user_id = %user_id, "chat scope opened");

        Self {
            conversation_id,
            user_id,
            stream,
            composer,
            echoes,
            draft: String::new(),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn stream_mut(&mut self) -> &mut MessageStream {
        &mut self.stream
    }

    /// Waits for the next message view.
    pub async fn next(&mut self) -> Option<ViewEvent<DisplayMessage>> {
        self.stream.next().await
    }

    pub fn echoes(&self) -> &EchoBuffer {
        &self.echoes
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Sends the draft. On acceptance the draft is cleared and the echo is
    /// shown before this returns; the writes run on a spawned task whose
    /// handle is returned. A rejected draft is left in place.
    pub fn send_draft(&mut self) -> ChatSyncResult<JoinHandle<ChatSyncResult<SendReceipt>>> {
        validate_text(&self.draft)?;
        let text = std::mem::take(&mut self.draft);

        match self.composer.begin(&self.conversation_id, &self.user_id, &text) {
            Ok(outgoing) => Ok(tokio::spawn(outgoing.commit())),
            Err(error) => {
                self.draft = text;
                Err(error)
            }
        }
    }

    /// Sends `text` as the scope's user and waits for both writes.
    pub async fn send(&self, text: &str) -> ChatSyncResult<SendReceipt> {
        self.composer
            .begin(&self.conversation_id, &self.user_id, text)?
            .commit()
            .await
    }

    /// Closes the stream and discards pending echoes. Idempotent.
    pub fn close(&mut self) {
        if self.stream.is_closed() && self.echoes.is_closed() {
            return;
        }
        self.stream.close();
        self.echoes.close();
        debug!(conversation_id = %self.conversation_id, "chat scope closed");
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}

impl Drop for ChatScope {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChatScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatScope")
            .field("conversation_id", &self.conversation_id)
            .field("user_id", &self.user_id)
            .field("echoes", &self.echoes)
            .field("draft_len", &self.draft.len())
            .finish()
    }
}
