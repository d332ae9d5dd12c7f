//! Scope ownership, close, and teardown.
//!
//! Rules covered:
//! - 1. Closing a stream twice is fine and nothing is delivered afterwards
//! - 2. Removing a favorite twice is fine
//! - 3. Opening another chat closes the previous scope
//! - 4. A send in flight at teardown completes without reaching any view
//! - 5. Scope operations need a session
//! - 6. Reopening a stream on another conversation shows only that conversation
//! - 7. Opening a chat whose scope was closed gives a live scope

use doc_store::StoreOp;

use super::*;
use crate::error::{ChatSyncError, ValidationError};
use crate::subscription_manager::SubscriptionManager;
use crate::types::FavoriteListing;

/// Rule 1: Closing a stream twice is fine and nothing is delivered afterwards
#[tokio::test]
async fn rule_1_close_is_idempotent() {
    let fx = Fixture::new();
    let cid = fx.conversation("alice", "bob").await;
    let mut stream = fx.stream(&cid);
    messages_until(&mut stream, |_| true).await;

    stream.close();
    stream.close();
    fx.composer()
        .send(&cid, &UserId::from("alice"), "after close")
        .await
        .unwrap();

    assert!(stream.is_closed());
    assert!(stream.try_next().is_none());
    assert!(stream.next().await.is_none());
}

/// Rule 2: Removing a favorite twice is fine
#[tokio::test]
async fn rule_2_favorite_remove_twice() {
    let fx = Fixture::new();
    let mut manager = SubscriptionManager::new(fx.dyn_store.clone(), fast_config());
    manager.start_session(SessionContext::new("alice"));
    let favorites = manager.favorites().unwrap();

    favorites.save(&FavoriteListing::new("l1", "Loft")).await.unwrap();
    favorites.remove("l1").await.unwrap();
    let writes = fx.store.sink().len();
    favorites.remove("l1").await.unwrap();

    assert_eq!(fx.store.sink().len(), writes);
    assert!(!favorites.is_saved("l1").await.unwrap());
}

/// Rule 3: Opening another chat closes the previous scope
#[tokio::test]
async fn rule_3_one_chat_scope_at_a_time() {
    let fx = Fixture::new();
    let mut manager = SubscriptionManager::new(fx.dyn_store.clone(), fast_config());
    manager.start_session(SessionContext::new("alice"));
    let with_bob = manager.start_conversation(&UserId::from("bob")).await.unwrap();
    let with_carol = manager.start_conversation(&UserId::from("carol")).await.unwrap();

    let first_echoes = manager.open_chat(&with_bob).await.unwrap().echoes().clone();
    assert!(!first_echoes.is_closed());

    let scope = manager.open_chat(&with_carol).await.unwrap();
    assert_eq!(scope.conversation_id(), &with_carol);
    assert!(first_echoes.is_closed());

    let again = manager.open_chat(&with_carol).await.unwrap();
    assert!(!again.echoes().is_closed());
    assert_eq!(manager.chat_mut().map(|s| s.conversation_id().clone()), Some(with_carol));
}

/// Rule 4: A send in flight at teardown completes without reaching any view
#[tokio::test]
async fn rule_4_teardown_with_send_in_flight() {
    let fx = Fixture::new();
    let mut manager = SubscriptionManager::new(fx.dyn_store.clone(), fast_config());
    manager.start_session(SessionContext::new("alice"));
    let cid = manager.start_conversation(&UserId::from("bob")).await.unwrap();

    let scope = manager.open_chat(&cid).await.unwrap();
    messages_until(scope.stream_mut(), |v| v.is_empty()).await;

    fx.store.hold(StoreOp::Create);
    scope.set_draft("bye");
    let handle = scope.send_draft().unwrap();
    let echoes = scope.echoes().clone();
    while fx.store.waiting(StoreOp::Create) == 0 {
        tokio::task::yield_now().await;
    }

    manager.teardown();
    manager.teardown();
    assert!(manager.chat_mut().is_none());
    assert!(manager.inbox_mut().is_none());
    assert!(echoes.is_closed());
    assert!(echoes.is_empty());

    fx.store.release(StoreOp::Create);
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.conversation_id, cid);
    assert_eq!(fx.store.document_count(&cid.messages_path()), 1);
    assert!(echoes.is_empty());
}

/// Rule 5: Scope operations need a session
#[tokio::test]
async fn rule_5_session_required() {
    let fx = Fixture::new();
    let mut manager = SubscriptionManager::new(fx.dyn_store.clone(), fast_config());
    let no_session = ChatSyncError::Validation(ValidationError::NoSession);

    assert_eq!(manager.open_inbox().unwrap_err(), no_session);
    assert_eq!(manager.favorites().unwrap_err(), no_session);
    assert_eq!(
        manager.start_conversation(&UserId::from("bob")).await.unwrap_err(),
        no_session
    );

    manager.start_session(SessionContext::new("alice"));
    assert!(manager.open_inbox().is_ok());

    manager.end_session();
    assert!(manager.session().is_none());
    assert!(manager.inbox_mut().is_none());
    assert_eq!(
        manager
            .open_chat(&ConversationId::from("alice_bob"))
            .await
            .unwrap_err(),
        no_session
    );
}

/// Rule 6: Reopening a stream on another conversation shows only that conversation
#[tokio::test]
async fn rule_6_reopen_switches_conversation() {
    let fx = Fixture::new();
    let composer = fx.composer();
    let first = fx.conversation("alice", "bob").await;
    let second = fx.conversation("alice", "carol").await;
    composer.send(&first, &UserId::from("bob"), "from bob").await.unwrap();
    composer.send(&second, &UserId::from("carol"), "from carol").await.unwrap();

    let mut stream = fx.stream(&first);
    let view = messages_until(&mut stream, |v| v.len() == 1).await;
    assert_eq!(texts(&view), vec!["from bob"]);

    stream.reopen(second.clone());
    assert_eq!(stream.conversation_id(), &second);
    let view = messages_until(&mut stream, |v| !v.is_empty()).await;
    assert_eq!(texts(&view), vec!["from carol"]);
}

/// Rule 7: Opening a chat whose scope was closed gives a live scope
#[tokio::test]
async fn rule_7_open_after_close_is_live() {
    let fx = Fixture::new();
    let mut manager = SubscriptionManager::new(fx.dyn_store.clone(), fast_config());
    manager.start_session(SessionContext::new("alice"));
    let cid = manager.start_conversation(&UserId::from("bob")).await.unwrap();

    manager.open_chat(&cid).await.unwrap().close();
    assert!(manager.chat_mut().unwrap().is_closed());

    let scope = manager.open_chat(&cid).await.unwrap();
    assert!(!scope.is_closed());
    assert!(!scope.echoes().is_closed());

    scope.send("back").await.unwrap();
    let view = messages_until(scope.stream_mut(), |v| confirmed(v) == 1).await;
    assert_eq!(texts(&view), vec!["back"]);
}
