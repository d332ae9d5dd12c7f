//! # conversation-sync-core
//!
//! Real-time conversation sync over a [`doc_store::DocumentStore`].
//!
//! ## Components
//!
//! - [`MessageStream`]: live messages of one conversation, ordered by
//!   server `createdAt`, with optimistic echoes merged in
//! - [`ConversationIndex`]: live inbox of one user, newest `updatedAt` first
//! - [`Composer`]: two-phase sends (append, then summary merge)
//! - [`SubscriptionManager`]: at most one inbox and one chat scope, torn
//!   down together on session switch
//! - [`ConversationDirectory`] and [`Favorites`]: point reads and writes
//!
//! ## Layout in the store
//!
//! ```text
//! chats/{conversationId}                   participants, lastMessage, updatedAt
//! chats/{conversationId}/messages/{id}     text, senderId, createdAt
//! users/{userId}/favorites/{listingId}     listingId, title, savedAt, ...
//! ```

mod backoff;
mod composer;
mod config;
mod conversation_index;
mod directory;
mod echo;
mod error;
mod favorites;
mod live_view;
mod message_stream;
mod reconcile;
mod send_fsm;
mod session;
mod subscription_manager;
mod types;

#[cfg(test)]
mod tests;

pub use backoff::{retry_idempotent_store_call, retry_store_call, RetryPolicy};
pub use composer::{validate_text, Composer, OutgoingMessage, SendReceipt, StaleSummaries};
pub use config::SyncConfig;
pub use conversation_index::{sort_by_recency, ConversationIndex};
pub use directory::ConversationDirectory;
pub use echo::{Echo, EchoBuffer};
pub use error::{ChatSyncError, ChatSyncResult, ValidationError};
pub use favorites::Favorites;
pub use live_view::{LiveView, ViewEvent};
pub use message_stream::MessageStream;
pub use reconcile::{build_view, match_echoes, sort_messages, EchoMatch, MessageLog};
pub use send_fsm::{SendMachine, SendMachineInput, SendMachineState, SendState};
pub use session::SessionContext;
pub use subscription_manager::{ChatScope, SubscriptionManager};
pub use types::{
    fields, ConversationId, ConversationSummary, Delivery, DisplayMessage, FavoriteListing,
    LocalMessageId, Message, MessageId, MessageKey, UserId, CHATS_COLLECTION, EMPTY_PREVIEW,
    FAVORITES_COLLECTION, MESSAGES_COLLECTION, USERS_COLLECTION,
};
