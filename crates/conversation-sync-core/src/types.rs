//! Core types for conversation sync.
//!
//! Documents are read into these types at the edge. Anything missing a
//! required field is skipped rather than surfaced half-decoded.

use doc_store::{CollectionPath, DocPath, Document, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection holding one document per conversation.
pub const CHATS_COLLECTION: &str = "chats";
/// Subcollection of a conversation holding its messages.
pub const MESSAGES_COLLECTION: &str = "messages";
/// Collection holding one document per user.
pub const USERS_COLLECTION: &str = "users";
/// Subcollection of a user holding saved listings.
pub const FAVORITES_COLLECTION: &str = "favorites";

/// Conversation and message field names as stored.
pub mod fields {
    pub const PARTICIPANTS: &str = "participants";
    pub const LAST_MESSAGE: &str = "lastMessage";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const TEXT: &str = "text";
    pub const SENDER_ID: &str = "senderId";
    pub const CREATED_AT: &str = "createdAt";
    pub const LISTING_ID: &str = "listingId";
    pub const TITLE: &str = "title";
    pub const SAVED_AT: &str = "savedAt";
}

/// Inbox preview shown for a conversation with no messages yet.
pub const EMPTY_PREVIEW: &str = "No messages yet";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates an id from an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Opaque user identity supplied by the authentication collaborator.
    UserId
);
string_id!(
    /// Conversation document id.
    ConversationId
);
string_id!(
    /// Store-assigned message document id.
    MessageId
);

/// Client-side id of an optimistic echo; never leaves this process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LocalMessageId(Uuid);

impl LocalMessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

impl ConversationId {
    /// Path of the conversation document (`chats/{id}`).
    pub fn doc_path(&self) -> DocPath {
        CollectionPath::root(CHATS_COLLECTION).doc(self.as_str())
    }

    /// Path of the conversation's message log (`chats/{id}/messages`).
    pub fn messages_path(&self) -> CollectionPath {
        self.doc_path().child(MESSAGES_COLLECTION)
    }
}

/// A durably committed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

impl Message {
    /// Decodes a message document. Returns None while `createdAt` is unset
    /// or when any required field is missing.
    pub fn from_document(conversation_id: &ConversationId, doc: &Document) -> Option<Self> {
        Some(Self {
            id: MessageId::from_string(doc.id()),
            conversation_id: conversation_id.clone(),
            sender_id: UserId::from_string(doc.str_field(fields::SENDER_ID)?),
            text: doc.str_field(fields::TEXT)?.to_string(),
            created_at: doc.timestamp(fields::CREATED_AT)?,
        })
    }
}

/// Denormalized conversation summary as listed in the inbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub last_message: Option<String>,
    pub updated_at: Option<Timestamp>,
}

impl ConversationSummary {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: ConversationId::from_string(doc.id()),
            participants: doc
                .string_array(fields::PARTICIPANTS)
                .unwrap_or_default()
                .into_iter()
                .map(UserId::from)
                .collect(),
            last_message: doc.str_field(fields::LAST_MESSAGE).map(str::to_string),
            updated_at: doc.timestamp(fields::UPDATED_AT),
        }
    }

    pub fn includes(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participants other than `user`.
    pub fn others<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants.iter().filter(move |p| *p != user)
    }

    /// Text shown in the inbox row.
    pub fn preview(&self) -> &str {
        self.last_message.as_deref().unwrap_or(EMPTY_PREVIEW)
    }
}

/// Identity of a row in a message view.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKey {
    /// A committed message.
    Server(MessageId),
    /// An optimistic echo still waiting for its committed copy.
    Local(LocalMessageId),
}

/// Whether a row is a committed message or a send still in flight.
///
/// Echoes are meant to read exactly like committed messages until the send
/// fails. Use this for bookkeeping (retry affordances, tests), not to style
/// pending rows differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Confirmed,
}

/// A row in a message view: either a committed message or an echo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    pub key: MessageKey,
    pub sender_id: UserId,
    pub text: String,
    /// `createdAt` for committed messages; local issue time for echoes.
    pub timestamp: Timestamp,
    /// Not a display hint; see [`Delivery`].
    pub delivery: Delivery,
}

impl DisplayMessage {
    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Server(id) => Some(id),
            MessageKey::Local(_) => None,
        }
    }
}

impl From<&Message> for DisplayMessage {
    fn from(message: &Message) -> Self {
        Self {
            key: MessageKey::Server(message.id.clone()),
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            timestamp: message.created_at,
            delivery: Delivery::Confirmed,
        }
    }
}

/// A listing the user saved.
#[derive(Clone, Debug, PartialEq)]
pub struct FavoriteListing {
    pub listing_id: String,
    pub title: String,
    /// Unset until the first save has committed.
    pub saved_at: Option<Timestamp>,
    /// Extra listing fields copied at save time (price, address, image).
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl FavoriteListing {
    pub fn new(listing_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            title: title.into(),
            saved_at: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn from_document(doc: &Document) -> Self {
        let mut details = doc.fields.clone();
        let listing_id = details
            .remove(fields::LISTING_ID)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| doc.id().to_string());
        let title = details
            .remove(fields::TITLE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let saved_at = details
            .remove(fields::SAVED_AT)
            .and_then(|v| Timestamp::from_value(&v));

        Self {
            listing_id,
            title,
            saved_at,
            details,
        }
    }
}
