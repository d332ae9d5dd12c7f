//! Two-party exchange over the in-process store.
//!
//! The sender composes through its chat scope; the recipient only watches
//! its inbox. Both views are printed as JSON lines once they settle.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use conversation_sync_core::{
    ConversationIndex, ConversationSummary, DisplayMessage, MessageStream,
    SessionContext, SubscriptionManager, SyncConfig, UserId, ViewEvent,
};
use doc_store::{DocumentStore, InMemoryStore};
use serde_json::json;
use tracing::{info, warn};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(
    config: SyncConfig,
    from: UserId,
    to: UserId,
    messages: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::default());

    let mut sender = SubscriptionManager::new(store.clone(), config.clone());
    let mut recipient = SubscriptionManager::new(store, config);
    sender.start_session(SessionContext::new(from.clone()));
    recipient.start_session(SessionContext::new(to.clone()));

    let conversation_id = sender.start_conversation(&to).await?;
    info!(%conversation_id, %from, %to, "conversation ready");

    let scope = sender.open_chat(&conversation_id).await?;
    for text in &messages {
        scope.set_draft(text.as_str());
        let receipt = scope.send_draft()?.await??;
        info!(message_id = %receipt.message_id, state = ?receipt.state, "sent");
    }
    let transcript = settle_transcript(scope.stream_mut(), messages.len()).await?;

    if !sender.stale_summaries().is_empty() {
        let repaired = sender.repair_stale_summaries().await?;
        info!(repaired, "stale summaries repaired");
    }

    let inbox = settle_inbox(recipient.open_inbox()?, |rows| {
        rows.iter()
            .any(|row| row.id == conversation_id && row.last_message.is_some())
    })
    .await?;

    for message in &transcript {
        println!("{}", message_line(message));
    }
    for row in &inbox {
        println!("{}", inbox_line(row, &to));
    }

    sender.teardown();
    recipient.teardown();
    Ok(())
}

/// Waits until at least `expected` committed messages are shown.
async fn settle_transcript(
    stream: &mut MessageStream,
    expected: usize,
) -> Result<Vec<DisplayMessage>, Box<dyn Error>> {
    let wait = async {
        let mut latest = Vec::new();
        while let Some(event) = stream.next().await {
            report(&event);
            latest = event.items().to_vec();
            if latest.iter().filter(|m| !m.is_pending()).count() >= expected {
                break;
            }
        }
        latest
    };
    Ok(tokio::time::timeout(SETTLE_TIMEOUT, wait).await?)
}

async fn settle_inbox(
    index: &mut ConversationIndex,
    done: impl Fn(&[ConversationSummary]) -> bool,
) -> Result<Vec<ConversationSummary>, Box<dyn Error>> {
    let wait = async {
        let mut latest = Vec::new();
        while let Some(event) = index.next().await {
            report(&event);
            latest = event.items().to_vec();
            if done(latest.as_slice()) {
                break;
            }
        }
        latest
    };
    Ok(tokio::time::timeout(SETTLE_TIMEOUT, wait).await?)
}

fn report<T>(event: &ViewEvent<T>) {
    match event {
        ViewEvent::Snapshot(_) => {}
        ViewEvent::TransientError { error, .. } => warn!(%error, "view reconnecting"),
        ViewEvent::Stalled { error, .. } => warn!(%error, "view stalled"),
    }
}

fn message_line(message: &DisplayMessage) -> serde_json::Value {
    json!({
        "sender": message.sender_id,
        "text": message.text,
        "at": message.timestamp.to_datetime().map(|t| t.to_rfc3339()),
        // Diagnostic only; a chat UI renders both kinds of row alike.
        "committed": !message.is_pending(),
    })
}

fn inbox_line(row: &ConversationSummary, viewer: &UserId) -> serde_json::Value {
    json!({
        "conversation": row.id,
        "with": row.others(viewer).collect::<Vec<_>>(),
        "preview": row.preview(),
        "updatedAt": row.updated_at.and_then(|t| t.to_datetime()).map(|t| t.to_rfc3339()),
    })
}
