//! Optimistic echoes of in-flight sends.
//!
//! An echo is shown the moment a send is accepted and lives until the
//! committed copy of the message arrives on the stream, or until the append
//! fails. Each chat scope owns one buffer. The buffer is shared only between
//! that scope's composer and its message stream.
//!
//! After [`EchoBuffer::close`] every mutation is ignored, so a send that
//! outlives its scope completes without touching the discarded view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use doc_store::Timestamp;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::types::{ConversationId, LocalMessageId, MessageId, UserId};

/// A locally shown, not yet reconciled message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Echo {
    pub local_id: LocalMessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    /// Local clock at the moment the echo was shown.
    pub issued_at: Timestamp,
    /// Set once the append returns the store-assigned id.
    pub confirmed_id: Option<MessageId>,
    /// Committed messages already visible when the echo was shown. These can
    /// never be this echo's committed copy. `None` when the stream had not
    /// delivered its first snapshot yet; such an echo only matches messages
    /// committed at or after `issued_at`.
    pub preexisting: Option<Arc<HashSet<MessageId>>>,
}

#[derive(Default)]
struct EchoState {
    echoes: Vec<Echo>,
    known: HashMap<ConversationId, Arc<HashSet<MessageId>>>,
    closed: bool,
}

/// Scope-owned collection of pending echoes.
#[derive(Clone)]
pub struct EchoBuffer {
    state: Arc<Mutex<EchoState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl EchoBuffer {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(EchoState::default())),
            changes: Arc::new(changes),
        }
    }

    /// Shows an echo for a send that has just been accepted.
    pub fn push(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        text: &str,
    ) -> LocalMessageId {
        let local_id = LocalMessageId::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                return local_id;
            }
            let preexisting = state.known.get(conversation_id).cloned();
            state.echoes.push(Echo {
                local_id,
                conversation_id: conversation_id.clone(),
                sender_id: sender_id.clone(),
                text: text.to_string(),
                issued_at: Timestamp::now(),
                confirmed_id: None,
                preexisting,
            });
        }
        self.bump();
        local_id
    }

    /// Records the store-assigned id of an echo's committed copy.
    pub fn confirm(&self, local_id: LocalMessageId, message_id: MessageId) {
        let updated = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            match state.echoes.iter_mut().find(|e| e.local_id == local_id) {
                Some(echo) => {
                    echo.confirmed_id = Some(message_id);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.bump();
        }
    }

    /// Drops an echo whose send failed. Returns true if it was present.
    pub fn remove(&self, local_id: LocalMessageId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.echoes.len();
            state.echoes.retain(|e| e.local_id != local_id);
            !state.closed && state.echoes.len() != before
        };
        if removed {
            self.bump();
        }
        removed
    }

    /// Drops echoes absorbed by their committed copies. Does not signal a
    /// change; the caller is the stream that just rendered the merge.
    pub(crate) fn retire(&self, local_ids: &[LocalMessageId]) {
        if local_ids.is_empty() {
            return;
        }
        self.state
            .lock()
            .echoes
            .retain(|e| !local_ids.contains(&e.local_id));
    }

    /// Records which committed messages a stream has seen for a conversation.
    pub(crate) fn observe<'a>(
        &self,
        conversation_id: &ConversationId,
        ids: impl IntoIterator<Item = &'a MessageId>,
    ) {
        let known: HashSet<MessageId> = ids.into_iter().cloned().collect();
        self.state
            .lock()
            .known
            .insert(conversation_id.clone(), Arc::new(known));
    }

    /// Pending echoes for one conversation, in issue order.
    pub fn pending_for(&self, conversation_id: &ConversationId) -> Vec<Echo> {
        self.state
            .lock()
            .echoes
            .iter()
            .filter(|e| &e.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().echoes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all echoes and ignores later mutations. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.echoes.clear();
        state.known.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Receiver that wakes whenever echoes are shown, confirmed, or rolled back.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

impl Default for EchoBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EchoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EchoBuffer")
            .field("pending", &state.echoes.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn push_confirm_remove() {
        let buffer = EchoBuffer::new();
        let mut changes = buffer.subscribe();
        let sender = UserId::from("alice");

        let local = buffer.push(&cid(), &sender, "hi");
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        buffer.confirm(local, MessageId::from("m1"));
        assert!(changes.has_changed().unwrap());
        assert_eq!(
            buffer.pending_for(&cid())[0].confirmed_id,
            Some(MessageId::from("m1"))
        );

        assert!(buffer.remove(local));
        assert!(!buffer.remove(local));
        assert!(buffer.is_empty());
    }

    #[test]
    fn echoes_remember_preexisting_messages() {
        let buffer = EchoBuffer::new();
        let old = MessageId::from("old");
        buffer.observe(&cid(), [&old]);

        buffer.push(&cid(), &UserId::from("alice"), "ok");
        let echo = &buffer.pending_for(&cid())[0];
        assert!(echo.preexisting.as_ref().unwrap().contains(&old));
    }

    #[test]
    fn echoes_before_first_snapshot_are_unsynced() {
        let buffer = EchoBuffer::new();
        buffer.push(&cid(), &UserId::from("alice"), "ok");
        assert!(buffer.pending_for(&cid())[0].preexisting.is_none());

        buffer.observe(&cid(), std::iter::empty());
        buffer.push(&cid(), &UserId::from("alice"), "ok");
        assert!(buffer.pending_for(&cid())[1].preexisting.is_some());
    }

    #[test]
    fn pending_for_filters_by_conversation() {
        let buffer = EchoBuffer::new();
        let sender = UserId::from("alice");
        buffer.push(&cid(), &sender, "a");
        buffer.push(&ConversationId::from("c2"), &sender, "b");

        assert_eq!(buffer.pending_for(&cid()).len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn closed_buffer_ignores_mutations() {
        let buffer = EchoBuffer::new();
        let sender = UserId::from("alice");
        let local = buffer.push(&cid(), &sender, "before");

        buffer.close();
        buffer.close();
        assert!(buffer.is_closed());
        assert!(buffer.is_empty());

        buffer.push(&cid(), &sender, "after");
        buffer.confirm(local, MessageId::from("m1"));
        assert!(!buffer.remove(local));
        assert!(buffer.is_empty());
    }
}
