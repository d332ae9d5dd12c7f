//! Error types for conversation sync.

use doc_store::StoreError;
use thiserror::Error;

use crate::types::{ConversationId, MessageId, UserId};

/// A send rejected locally, before any store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,

    #[error("{sender} is not a participant of {conversation_id}")]
    NotParticipant {
        sender: UserId,
        conversation_id: ConversationId,
    },

    #[error("cannot start a conversation with yourself")]
    SelfConversation,

    #[error("no active session")]
    NoSession,
}

/// Errors surfaced by the sync core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatSyncError {
    /// The store could not be reached. Subscriptions retry this on their own.
    #[error("store unreachable: {0}")]
    Connectivity(#[source] StoreError),

    /// Rejected locally, never retried.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// The message committed but the conversation summary did not. The
    /// summary stays stale until the next successful send or a repair.
    #[error("message {message_id} committed but summary of {conversation_id} is stale: {source}")]
    PartialWrite {
        conversation_id: ConversationId,
        message_id: MessageId,
        #[source]
        source: StoreError,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl ChatSyncError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ChatSyncError::Connectivity(_))
    }

    /// True when the message itself is durable despite the error.
    pub fn message_committed(&self) -> bool {
        matches!(self, ChatSyncError::PartialWrite { .. })
    }
}

impl From<StoreError> for ChatSyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(_) => ChatSyncError::Connectivity(error),
            StoreError::NotFound(path) => ChatSyncError::NotFound {
                entity: "document",
                id: path,
            },
            other => ChatSyncError::Store(other),
        }
    }
}

/// Result type alias using ChatSyncError.
pub type ChatSyncResult<T> = Result<T, ChatSyncError>;
