//! Partial writes, retries, and stalled views.
//!
//! Rules covered:
//! - 1. A committed message with a failed summary is `PartialWrite`, repairable later
//! - 2. A later successful send clears the stale entry
//! - 3. Transient summary failures are retried before surfacing
//! - 4. Non-retryable append failures are not retried
//! - 5. A dropped subscription reports the last good view and resubscribes
//! - 6. A stalled view keeps its data and resumes on `retry()`
//! - 7. Summary updates retry internal store errors; caller errors go stale at once

use doc_store::{StoreError, StoreOp};

use super::*;
use crate::error::ChatSyncError;
use crate::types::fields;

/// Rule 1: A committed message with a failed summary is `PartialWrite`, repairable later
#[tokio::test(start_paused = true)]
async fn rule_1_partial_write_then_repair() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let composer = fx.composer();

    fx.store
        .fail_always(StoreOp::Upsert, StoreError::Unavailable("summary down".into()));
    let error = composer
        .send(&cid, &UserId::from("alice"), "hi")
        .await
        .unwrap_err();

    assert!(error.message_committed());
    assert!(matches!(&error, ChatSyncError::PartialWrite { conversation_id, .. } if conversation_id == &cid));
    assert_eq!(fx.store.document_count(&cid.messages_path()), 1);
    assert!(composer.stale_summaries().contains(&cid));
    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert!(summary.get(fields::LAST_MESSAGE).is_none());

    let mut stream = fx.stream(&cid);
    let view = messages_until(&mut stream, |v| confirmed(v) == 1).await;
    assert_eq!(texts(&view), vec!["hi"]);

    fx.store.clear_faults();
    assert_eq!(composer.repair_stale_summaries().await, Ok(1));
    assert!(composer.stale_summaries().is_empty());

    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert_eq!(summary.str_field(fields::LAST_MESSAGE), Some("hi"));
    assert!(summary.timestamp(fields::UPDATED_AT) >= Some(view[0].timestamp));
}

/// Rule 2: A later successful send clears the stale entry
#[tokio::test(start_paused = true)]
async fn rule_2_next_send_clears_stale() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let composer = fx.composer();

    fx.store
        .fail_always(StoreOp::Upsert, StoreError::Unavailable("summary down".into()));
    composer
        .send(&cid, &UserId::from("alice"), "lost summary")
        .await
        .unwrap_err();
    assert_eq!(composer.stale_summaries().len(), 1);

    fx.store.clear_faults();
    composer.send(&cid, &UserId::from("bob"), "again").await.unwrap();

    assert!(composer.stale_summaries().is_empty());
    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert_eq!(summary.str_field(fields::LAST_MESSAGE), Some("again"));
}

/// Rule 3: Transient summary failures are retried before surfacing
#[tokio::test(start_paused = true)]
async fn rule_3_summary_retries() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let composer = fx.composer();

    fx.store
        .fail_next(StoreOp::Upsert, 2, StoreError::Unavailable("blip".into()));
    composer.send(&cid, &UserId::from("alice"), "made it").await.unwrap();

    assert!(composer.stale_summaries().is_empty());
    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert_eq!(summary.str_field(fields::LAST_MESSAGE), Some("made it"));
}

/// Rule 4: Non-retryable append failures are not retried
#[tokio::test]
async fn rule_4_permission_denied_fails_fast() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let composer = fx.composer();

    fx.store
        .fail_next(StoreOp::Create, 1, StoreError::PermissionDenied("rules".into()));
    let error = composer
        .send(&cid, &UserId::from("alice"), "denied")
        .await
        .unwrap_err();

    assert_eq!(error, ChatSyncError::Store(StoreError::PermissionDenied("rules".into())));
    assert_eq!(fx.store.document_count(&cid.messages_path()), 0);
    assert!(composer.echoes().is_empty());

    // The single injected fault was consumed by exactly one attempt.
    composer.send(&cid, &UserId::from("alice"), "allowed").await.unwrap();
    assert_eq!(fx.store.document_count(&cid.messages_path()), 1);
}

/// Rule 5: A dropped subscription reports the last good view and resubscribes
#[tokio::test(start_paused = true)]
async fn rule_5_transient_error_keeps_last_view() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    fx.composer()
        .send(&cid, &UserId::from("alice"), "hi")
        .await
        .unwrap();

    let mut stream = fx.stream(&cid);
    messages_until(&mut stream, |v| v.len() == 1).await;

    fx.store
        .fail_watchers(StoreError::Unavailable("connection reset".into()));
    let last_known = loop {
        match stream.next().await {
            Some(ViewEvent::TransientError { last_known, .. }) => break last_known,
            Some(ViewEvent::Snapshot(_)) => continue,
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(texts(&last_known), vec!["hi"]);

    let view = messages_until(&mut stream, |v| v.len() == 1).await;
    assert_eq!(texts(&view), vec!["hi"]);
    assert!(!stream.is_closed());
}

/// Rule 6: A stalled view keeps its data and resumes on `retry()`
#[tokio::test(start_paused = true)]
async fn rule_6_stall_then_retry() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    fx.composer()
        .send(&cid, &UserId::from("alice"), "hi")
        .await
        .unwrap();

    let mut index = fx.index("alice");
    inbox_until(&mut index, |v| v.len() == 1).await;

    fx.store
        .fail_always(StoreOp::Subscribe, StoreError::Unavailable("offline".into()));
    fx.store.disconnect_watchers();

    let stalled = loop {
        match index.next().await {
            Some(ViewEvent::Stalled { last_known, .. }) => break last_known,
            Some(_) => continue,
            None => panic!("index closed"),
        }
    };
    assert_eq!(ids(&stalled), vec![cid.as_str()]);

    fx.store.clear_faults();
    index.retry();
    let view = inbox_until(&mut index, |v| v.len() == 1).await;
    assert_eq!(ids(&view), vec![cid.as_str()]);
}

/// Rule 7: Summary updates retry internal store errors; caller errors go stale at once
#[tokio::test(start_paused = true)]
async fn rule_7_summary_retries_internal_errors() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let composer = fx.composer();

    fx.store
        .fail_next(StoreOp::Upsert, 1, StoreError::Internal("backend hiccup".into()));
    composer.send(&cid, &UserId::from("alice"), "still here").await.unwrap();

    assert!(composer.stale_summaries().is_empty());
    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert_eq!(summary.str_field(fields::LAST_MESSAGE), Some("still here"));

    fx.store
        .fail_next(StoreOp::Upsert, 1, StoreError::PermissionDenied("rules".into()));
    let error = composer
        .send(&cid, &UserId::from("alice"), "denied summary")
        .await
        .unwrap_err();
    assert!(error.message_committed());
    assert!(composer.stale_summaries().contains(&cid));
    let summary = fx.store.peek(&cid.doc_path()).unwrap();
    assert_eq!(summary.str_field(fields::LAST_MESSAGE), Some("still here"));
}
