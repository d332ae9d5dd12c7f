//! Ordering and echo reconciliation shared by the live views.
//!
//! Committed messages are ordered by `(createdAt, id)`. Delivery order is
//! never trusted, so the whole view is re-sorted on every update. Echoes
//! are matched to their committed copies one-to-one:
//!
//! 1. An echo whose append returned an id matches only that id.
//! 2. Otherwise it matches the closest committed message from the same
//!    sender with the same text whose `createdAt` lies within the match
//!    window of the echo's issue time. Messages that were already visible
//!    when the echo was shown are never candidates. An echo shown before
//!    the stream's first snapshot has no such record, so it only matches
//!    messages committed at or after its issue time.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::echo::Echo;
use crate::types::{DisplayMessage, Delivery, LocalMessageId, Message, MessageId, MessageKey};

/// Committed messages of one conversation, deduplicated by id.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    by_id: HashMap<MessageId, Message>,
    ordered: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges delivered messages. Redelivery of a known id is a no-op.
    /// Returns true if anything changed.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> bool {
        let mut changed = false;
        for message in incoming {
            if self.by_id.get(&message.id) == Some(&message) {
                continue;
            }
            self.by_id.insert(message.id.clone(), message);
            changed = true;
        }
        if changed {
            self.ordered = self.by_id.values().cloned().collect();
            sort_messages(&mut self.ordered);
        }
        changed
    }

    /// Messages in `(createdAt, id)` order.
    pub fn ordered(&self) -> &[Message] {
        &self.ordered
    }

    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.by_id.keys()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Sorts by server timestamp, breaking ties by id.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// An echo paired with its committed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMatch {
    pub local_id: LocalMessageId,
    pub message_id: MessageId,
}

/// Pairs echoes with the committed messages that supersede them.
pub fn match_echoes(messages: &[Message], echoes: &[Echo], window: Duration) -> Vec<EchoMatch> {
    let present: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
    let reserved: HashSet<&MessageId> = echoes
        .iter()
        .filter_map(|e| e.confirmed_id.as_ref())
        .collect();

    let mut matches = Vec::new();
    let mut claimed: HashSet<&MessageId> = HashSet::new();

    for echo in echoes {
        if let Some(id) = &echo.confirmed_id {
            if present.contains(id) && claimed.insert(id) {
                matches.push(EchoMatch {
                    local_id: echo.local_id,
                    message_id: id.clone(),
                });
            }
        }
    }

    let mut unconfirmed: Vec<&Echo> = echoes.iter().filter(|e| e.confirmed_id.is_none()).collect();
    unconfirmed.sort_by_key(|e| (e.issued_at, e.local_id));

    for echo in unconfirmed {
        let best = messages
            .iter()
            .filter(|m| {
                m.conversation_id == echo.conversation_id
                    && m.sender_id == echo.sender_id
                    && m.text == echo.text
                    && !claimed.contains(&m.id)
                    && !reserved.contains(&m.id)
                    && match &echo.preexisting {
                        Some(seen) => !seen.contains(&m.id),
                        None => m.created_at >= echo.issued_at,
                    }
                    && m.created_at.distance(echo.issued_at) <= window
            })
            .min_by_key(|m| (m.created_at.distance(echo.issued_at), m.created_at));

        if let Some(message) = best {
            claimed.insert(&message.id);
            matches.push(EchoMatch {
                local_id: echo.local_id,
                message_id: message.id.clone(),
            });
        }
    }

    matches
}

/// Builds the displayed view: committed messages plus unmatched echoes,
/// sorted by timestamp.
pub fn build_view(messages: &[Message], echoes: &[Echo], matched: &[EchoMatch]) -> Vec<DisplayMessage> {
    let absorbed: HashSet<LocalMessageId> = matched.iter().map(|m| m.local_id).collect();

    let mut view: Vec<DisplayMessage> = messages.iter().map(DisplayMessage::from).collect();
    view.extend(
        echoes
            .iter()
            .filter(|e| !absorbed.contains(&e.local_id))
            .map(|echo| DisplayMessage {
                key: MessageKey::Local(echo.local_id),
                sender_id: echo.sender_id.clone(),
                text: echo.text.clone(),
                timestamp: echo.issued_at,
                delivery: Delivery::Pending,
            }),
    );

    view.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
    view
}
