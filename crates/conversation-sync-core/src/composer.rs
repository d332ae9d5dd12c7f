//! Two-phase sends with optimistic echoes.
//!
//! A send appends the message to `chats/{id}/messages`, then merges
//! `lastMessage`/`updatedAt` into `chats/{id}`. The two writes are not
//! atomic. When the append commits but the summary update keeps failing,
//! the conversation goes into the [`StaleSummaries`] ledger and the caller
//! gets [`ChatSyncError::PartialWrite`]. The message itself is durable and
//! shows up in every message stream.

use std::collections::HashMap;
use std::sync::Arc;

use doc_store::{Direction, DocumentStore, Query, StoreError, WriteFields};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::{retry_idempotent_store_call, retry_store_call};
use crate::config::SyncConfig;
use crate::directory::ConversationDirectory;
use crate::echo::EchoBuffer;
use crate::error::{ChatSyncError, ChatSyncResult, ValidationError};
use crate::send_fsm::{SendMachine, SendMachineInput, SendState};
use crate::types::{fields, ConversationId, LocalMessageId, Message, MessageId, UserId};

/// Rejects text that is empty after trimming whitespace.
pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(())
}

/// Conversations whose summary lags behind a committed message.
#[derive(Clone, Default)]
pub struct StaleSummaries {
    entries: Arc<Mutex<HashMap<ConversationId, MessageId>>>,
}

impl StaleSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `message_id` committed without its summary update.
    pub fn mark(&self, conversation_id: &ConversationId, message_id: &MessageId) {
        self.entries
            .lock()
            .insert(conversation_id.clone(), message_id.clone());
    }

    pub fn clear(&self, conversation_id: &ConversationId) -> bool {
        self.entries.lock().remove(conversation_id).is_some()
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.entries.lock().contains_key(conversation_id)
    }

    /// Stale conversations, sorted by id.
    pub fn list(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for StaleSummaries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.list()).finish()
    }
}

/// Outcome of a send whose message and summary both committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub local_id: LocalMessageId,
    pub state: SendState,
}

/// Sends messages on behalf of a chat scope.
///
/// Cloning is cheap; clones share the echo buffer and stale ledger.
#[derive(Clone)]
pub struct Composer {
    store: Arc<dyn DocumentStore>,
    directory: ConversationDirectory,
    echoes: EchoBuffer,
    stale: StaleSummaries,
    config: SyncConfig,
}

impl Composer {
    pub fn new(store: Arc<dyn DocumentStore>, directory: ConversationDirectory, config: SyncConfig) -> Self {
        Self {
            store,
            directory,
            echoes: EchoBuffer::new(),
            stale: StaleSummaries::new(),
            config,
        }
    }

    /// Shows echoes in `echoes` instead of a private buffer.
    pub fn with_echoes(mut self, echoes: EchoBuffer) -> Self {
        self.echoes = echoes;
        self
    }

    /// Shares a stale-summary ledger with other composers.
    pub fn with_stale_ledger(mut self, stale: StaleSummaries) -> Self {
        self.stale = stale;
        self
    }

    pub fn echoes(&self) -> &EchoBuffer {
        &self.echoes
    }

    pub fn stale_summaries(&self) -> &StaleSummaries {
        &self.stale
    }

    /// Validates a send and shows its echo, without any store call.
    ///
    /// Participants must already be cached in the directory. Use
    /// [`send`](Self::send) when they may not be.
    pub fn begin(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        text: &str,
    ) -> ChatSyncResult<OutgoingMessage> {
        let mut machine = SendMachine::new();

        if let Err(error) = self.check(conversation_id, sender_id, text) {
            advance(&mut machine, SendMachineInput::Rejected);
            debug!(conversation_id = %conversation_id, error = %error, "send rejected");
            return Err(error);
        }

        let local_id = self.echoes.push(conversation_id, sender_id, text);
        advance(&mut machine, SendMachineInput::EchoShown);
        debug!(conversation_id = %conversation_id, local_id = %local_id, "echo shown");

        Ok(OutgoingMessage {
            composer: self.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            text: text.to_string(),
            local_id,
            machine,
        })
    }

    /// Validates, shows the echo, and commits. Loads participants with a
    /// point read on a cache miss.
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        text: &str,
    ) -> ChatSyncResult<SendReceipt> {
        validate_text(text)?;
        self.directory.participants(conversation_id).await?;
        self.begin(conversation_id, sender_id, text)?.commit().await
    }

    /// Rewrites the summary of every conversation in the stale ledger from
    /// its newest message. Returns how many were repaired. Entries that
    /// still fail stay in the ledger; the first such error is returned.
    pub async fn repair_stale_summaries(&self) -> ChatSyncResult<usize> {
        let mut repaired = 0;
        let mut first_error = None;

        for conversation_id in self.stale.list() {
            match self.repair_one(&conversation_id).await {
                Ok(()) => {
                    self.stale.clear(&conversation_id);
                    repaired += 1;
                }
                Err(error) => {
                    warn!(conversation_id = %conversation_id, error = %error, "summary repair failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        info!(repaired, remaining = self.stale.len(), "stale summary repair finished");
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(repaired),
        }
    }

    async fn repair_one(&self, conversation_id: &ConversationId) -> Result<(), StoreError> {
        let latest = Query::new(conversation_id.messages_path())
            .order_by(fields::CREATED_AT, Direction::Desc)
            .limit(1);
        let snapshot = self.store.query(&latest).await?;

        let Some(message) = snapshot
            .documents
            .first()
            .and_then(|doc| Message::from_document(conversation_id, doc))
        else {
            debug!(conversation_id = %conversation_id, "no committed message to repair from");
            return Ok(());
        };

        let store = &self.store;
        let path = conversation_id.doc_path();
        let update = summary_fields(&message.text);
        retry_idempotent_store_call(&self.config.summary_retry, "repair_summary", || {
            store.upsert(&path, update.clone())
        })
        .await
    }

    fn check(&self, conversation_id: &ConversationId, sender_id: &UserId, text: &str) -> ChatSyncResult<()> {
        validate_text(text)?;
        let participants = self
            .directory
            .cached(conversation_id)
            .ok_or_else(|| ChatSyncError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
        if !participants.contains(sender_id) {
            return Err(ValidationError::NotParticipant {
                sender: sender_id.clone(),
                conversation_id: conversation_id.clone(),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("echoes", &self.echoes)
            .field("stale", &self.stale)
            .finish()
    }
}

/// A send whose echo is showing and whose writes have not started.
pub struct OutgoingMessage {
    composer: Composer,
    conversation_id: ConversationId,
    sender_id: UserId,
    text: String,
    local_id: LocalMessageId,
    machine: SendMachine,
}

impl OutgoingMessage {
    pub fn local_id(&self) -> LocalMessageId {
        self.local_id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn state(&self) -> SendState {
        SendState::from(self.machine.state())
    }

    /// Appends the message, then updates the conversation summary.
    ///
    /// On append failure the echo is rolled back and the summary is left
    /// untouched. On summary failure the message stays committed and
    /// [`ChatSyncError::PartialWrite`] is returned.
    pub async fn commit(mut self) -> ChatSyncResult<SendReceipt> {
        let composer = &self.composer;
        let store = &composer.store;
        let conversation_id = &self.conversation_id;

        let messages = conversation_id.messages_path();
        let message = WriteFields::new()
            .set(fields::TEXT, self.text.as_str())
            .set(fields::SENDER_ID, self.sender_id.as_str())
            .server_timestamp(fields::CREATED_AT);

        let appended = retry_store_call(&composer.config.send_retry, "append_message", || {
            store.create(&messages, message.clone())
        })
        .await;

        let message_id = match appended {
            Ok(id) => MessageId::from(id),
            Err(error) => {
                composer.echoes.remove(self.local_id);
                advance(&mut self.machine, SendMachineInput::MessageFailed);
                warn!(
                    conversation_id = %conversation_id,
                    local_id = %self.local_id,
                    error = %error,
                    "message append failed, echo rolled back"
                );
                return Err(error.into());
            }
        };

        composer.echoes.confirm(self.local_id, message_id.clone());
        advance(&mut self.machine, SendMachineInput::MessageCommitted);
        debug!(conversation_id = %conversation_id, message_id = %message_id, "message committed");

        let summary = conversation_id.doc_path();
        let update = summary_fields(&self.text);
        let updated = retry_idempotent_store_call(&composer.config.summary_retry, "update_summary", || {
            store.upsert(&summary, update.clone())
        })
        .await;

        match updated {
            Ok(()) => {
                if composer.stale.clear(conversation_id) {
                    info!(conversation_id = %conversation_id, "stale summary repaired by send");
                }
                Ok(SendReceipt {
                    conversation_id: conversation_id.clone(),
                    message_id,
                    local_id: self.local_id,
                    state: SendState::from(self.machine.state()),
                })
            }
            Err(error) => {
                composer.stale.mark(conversation_id, &message_id);
                warn!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    error = %error,
                    "summary update failed, conversation summary is stale"
                );
                Err(ChatSyncError::PartialWrite {
                    conversation_id: conversation_id.clone(),
                    message_id,
                    source: error,
                })
            }
        }
    }
}

impl std::fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("conversation_id", &self.conversation_id)
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .finish()
    }
}

fn summary_fields(text: &str) -> WriteFields {
    WriteFields::new()
        .set(fields::LAST_MESSAGE, text)
        .server_timestamp(fields::UPDATED_AT)
}

fn advance(machine: &mut SendMachine, input: SendMachineInput) {
    if machine.consume(&input).is_err() {
        warn!(state = ?machine.state(), input = ?input, "invalid send transition");
    }
}
