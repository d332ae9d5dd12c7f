//! Conversation participants, cached, and conversation creation.

use std::collections::HashMap;
use std::sync::Arc;

use doc_store::{DocumentStore, WriteFields};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ChatSyncError, ChatSyncResult, ValidationError};
use crate::session::SessionContext;
use crate::types::{fields, ConversationId, ConversationSummary, UserId};

/// Read-through cache of conversation participants.
///
/// Participants never change after a conversation is created, so cached
/// entries are never invalidated.
#[derive(Clone)]
pub struct ConversationDirectory {
    store: Arc<dyn DocumentStore>,
    cache: Arc<Mutex<HashMap<ConversationId, Vec<UserId>>>>,
}

impl ConversationDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deterministic id of the conversation between two users: both ids,
    /// sorted, joined with `_`.
    pub fn conversation_id_for(a: &UserId, b: &UserId) -> ConversationId {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        ConversationId::from_string(format!("{}_{}", first, second))
    }

    /// Participants if already known, without a store call.
    pub fn cached(&self, conversation_id: &ConversationId) -> Option<Vec<UserId>> {
        self.cache.lock().get(conversation_id).cloned()
    }

    /// Participants, read from the store on a cache miss.
    pub async fn participants(&self, conversation_id: &ConversationId) -> ChatSyncResult<Vec<UserId>> {
        if let Some(participants) = self.cached(conversation_id) {
            return Ok(participants);
        }
        self.load(conversation_id).await
    }

    /// Reads the conversation document and caches its participants.
    pub async fn load(&self, conversation_id: &ConversationId) -> ChatSyncResult<Vec<UserId>> {
        let doc = self
            .store
            .get(&conversation_id.doc_path())
            .await?
            .ok_or_else(|| ChatSyncError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        let summary = ConversationSummary::from_document(&doc);
        self.register(&summary);
        debug!(conversation_id = %conversation_id, participants = summary.participants.len(), "loaded conversation");
        Ok(summary.participants)
    }

    /// Seeds the cache from an index snapshot.
    pub fn register(&self, summary: &ConversationSummary) {
        self.cache
            .lock()
            .insert(summary.id.clone(), summary.participants.clone());
    }

    /// Creates (or reuses) the conversation between the session user and
    /// `other`. Leaves `lastMessage` and `updatedAt` untouched.
    pub async fn start_conversation(
        &self,
        session: &SessionContext,
        other: &UserId,
    ) -> ChatSyncResult<ConversationId> {
        let me = session.user_id();
        if me == other {
            return Err(ValidationError::SelfConversation.into());
        }

        let conversation_id = Self::conversation_id_for(me, other);
        let mut participants = vec![me.clone(), other.clone()];
        participants.sort();

        let payload: Vec<Value> = participants
            .iter()
            .map(|p| Value::String(p.to_string()))
            .collect();
        self.store
            .upsert(
                &conversation_id.doc_path(),
                WriteFields::new().set(fields::PARTICIPANTS, payload),
            )
            .await?;

        self.cache.lock().insert(conversation_id.clone(), participants);
        info!(conversation_id = %conversation_id, "conversation started");
        Ok(conversation_id)
    }
}

impl std::fmt::Debug for ConversationDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationDirectory")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::{InMemoryStore, NullSink, StoreOp};

    #[test]
    fn conversation_id_is_order_independent() {
        let a = UserId::from("bob");
        let b = UserId::from("alice");
        assert_eq!(
            ConversationDirectory::conversation_id_for(&a, &b),
            ConversationDirectory::conversation_id_for(&b, &a)
        );
        assert_eq!(
            ConversationDirectory::conversation_id_for(&a, &b).as_str(),
            "alice_bob"
        );
    }

    #[tokio::test]
    async fn start_conversation_writes_participants_only() {
        let store = Arc::new(InMemoryStore::new(NullSink));
        let directory = ConversationDirectory::new(store.clone());
        let session = SessionContext::new("alice");

        let cid = directory
            .start_conversation(&session, &UserId::from("bob"))
            .await
            .unwrap();

        let doc = store.peek(&cid.doc_path()).unwrap();
        assert_eq!(
            doc.string_array(fields::PARTICIPANTS),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
        assert!(doc.get(fields::LAST_MESSAGE).is_none());
        assert!(doc.get(fields::UPDATED_AT).is_none());
    }

    #[tokio::test]
    async fn self_conversation_is_rejected() {
        let store = Arc::new(InMemoryStore::new(NullSink));
        let directory = ConversationDirectory::new(store);
        let session = SessionContext::new("alice");

        let result = directory
            .start_conversation(&session, &UserId::from("alice"))
            .await;
        assert_eq!(
            result,
            Err(ChatSyncError::Validation(ValidationError::SelfConversation))
        );
    }

    #[tokio::test]
    async fn participants_read_through_once() {
        let store = Arc::new(InMemoryStore::new(NullSink));
        let session = SessionContext::new("alice");
        let cid = ConversationDirectory::new(store.clone())
            .start_conversation(&session, &UserId::from("bob"))
            .await
            .unwrap();

        let directory = ConversationDirectory::new(store.clone());
        assert!(directory.cached(&cid).is_none());
        assert_eq!(directory.participants(&cid).await.unwrap().len(), 2);

        store.fail_always(StoreOp::Get, doc_store::StoreError::Unavailable("offline".into()));
        assert_eq!(directory.participants(&cid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let store = Arc::new(InMemoryStore::new(NullSink));
        let directory = ConversationDirectory::new(store);
        let result = directory.load(&ConversationId::from("nope")).await;
        assert!(matches!(
            result,
            Err(ChatSyncError::NotFound { entity: "conversation", .. })
        ));
    }
}
