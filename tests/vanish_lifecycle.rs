mod common;

use crate::common::*;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vanish_chat::libs::presence::NotificationChannel;
use vanish_chat::libs::storage::records::{MessageRecord, UserRecord};
use vanish_chat::libs::storage::storage_traits::{MessageStore, StoreError, UserStore};
use vanish_chat::libs::vanish::VanishController;
use vanish_chat::{ChatApp, ChatError, ChatEvent, ConnectionHandle, MessageId, SendMessage, UserId};

/// Nobody is ever online; records every lookup and emit.
#[derive(Default)]
struct OfflineChannel {
    lookups: Mutex<Vec<UserId>>,
    emitted: Mutex<Vec<ChatEvent>>,
}

impl NotificationChannel for OfflineChannel {
    fn address_of(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.lookups.lock().unwrap().push(user_id.clone());
        None
    }

    fn emit(&self, _handle: &ConnectionHandle, event: ChatEvent) {
        self.emitted.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_vanish_message_deleted_after_delay() {
    let (_dir, app) = start_app().await;
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("psst").vanishing())
        .await
        .unwrap();

    app.messages().mark_seen(&message.message_id).await.unwrap();

    // Still readable during the delay window, now flagged as seen.
    let conversation = app
        .messages()
        .list_conversation(&alice.user_id, &bob.user_id)
        .await
        .unwrap();
    assert_eq!(conversation.len(), 1);
    assert!(conversation[0].seen);
    assert!(conversation[0].delete_at.is_some());

    let event = next_chat_event(&mut alice_sub, EVENT_TIMEOUT).await;
    assert_eq!(
        event,
        Some(ChatEvent::DeleteMessage {
            message_id: message.message_id.clone()
        })
    );

    let conversation = app
        .messages()
        .list_conversation(&bob.user_id, &alice.user_id)
        .await
        .unwrap();
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn test_plain_message_survives_mark_seen() {
    let (_dir, app) = start_app().await;
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("hello"))
        .await
        .unwrap();
    app.messages().mark_seen(&message.message_id).await.unwrap();

    assert_eq!(app.messages().vanish().pending_count().await, 0);
    assert_eq!(next_chat_event(&mut alice_sub, TEST_VANISH_DELAY * 3).await, None);

    let conversation = app
        .messages()
        .list_conversation(&alice.user_id, &bob.user_id)
        .await
        .unwrap();
    assert_eq!(conversation.len(), 1);
    assert!(conversation[0].seen);
    assert_eq!(conversation[0].delete_at, None);
}

#[tokio::test]
async fn test_second_mark_seen_does_not_reschedule() {
    let (_dir, app) = start_app().await;
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());
    let mut bob_sub = app.presence().connect(bob.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("once").vanishing())
        .await
        .unwrap();
    assert!(matches!(
        next_chat_event(&mut bob_sub, EVENT_TIMEOUT).await,
        Some(ChatEvent::NewMessage(_))
    ));

    app.messages().mark_seen(&message.message_id).await.unwrap();
    let first_deadline = app
        .messages()
        .list_conversation(&alice.user_id, &bob.user_id)
        .await
        .unwrap()[0]
        .delete_at;

    app.messages().mark_seen(&message.message_id).await.unwrap();
    assert_eq!(app.messages().vanish().pending_count().await, 1);

    let conversation = app
        .messages()
        .list_conversation(&alice.user_id, &bob.user_id)
        .await
        .unwrap();
    assert_eq!(conversation[0].delete_at, first_deadline);

    let expected = ChatEvent::DeleteMessage {
        message_id: message.message_id.clone(),
    };
    assert_eq!(next_chat_event(&mut alice_sub, EVENT_TIMEOUT).await, Some(expected.clone()));
    assert_eq!(next_chat_event(&mut bob_sub, EVENT_TIMEOUT).await, Some(expected));

    // No second timer fires.
    tokio::time::sleep(TEST_VANISH_DELAY * 3).await;
    assert!(queued_chat_events(&mut alice_sub).is_empty());
    assert!(queued_chat_events(&mut bob_sub).is_empty());
}

#[tokio::test]
async fn test_mark_seen_unknown_message_is_not_found() {
    let (_dir, app) = start_app().await;

    let result = app.messages().mark_seen(&MessageId::generate()).await;
    match result {
        Err(err @ ChatError::NotFound(_)) => assert_eq!(err.status_code(), 404),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_receiver_gets_no_delete_event() {
    let (_dir, app) = start_app().await;
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("bye").vanishing())
        .await
        .unwrap();
    app.messages().mark_seen(&message.message_id).await.unwrap();

    assert_eq!(
        next_chat_event(&mut alice_sub, EVENT_TIMEOUT).await,
        Some(ChatEvent::DeleteMessage {
            message_id: message.message_id.clone()
        })
    );

    // Bob comes online afterwards and sees nothing about the deleted message.
    let mut bob_sub = app.presence().connect(bob.user_id.clone());
    assert_eq!(next_chat_event(&mut bob_sub, TEST_VANISH_DELAY).await, None);
}

#[tokio::test]
async fn test_deletion_of_already_removed_message_is_silent() {
    let (dir, app) = start_app().await;
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("gone").vanishing())
        .await
        .unwrap();
    app.messages().mark_seen(&message.message_id).await.unwrap();

    // Removed by other means before the deadline.
    let store = open_store(&dir);
    let id = message.message_id.clone();
    let removed = store
        .with_transaction(|tx| tx.delete_message(&id))
        .unwrap();
    assert!(removed.is_some());

    assert_eq!(next_chat_event(&mut alice_sub, TEST_VANISH_DELAY * 3).await, None);
    assert_eq!(app.messages().vanish().pending_count().await, 0);
}

#[tokio::test]
async fn test_pending_deletion_recovered_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let (alice, message) = {
        let app = ChatApp::start(&config).await.unwrap();
        let alice = register(&app, "Alice").await;
        let bob = register(&app, "Bob").await;
        let message = app
            .messages()
            .send(&alice.user_id, &bob.user_id, SendMessage::text("later").vanishing())
            .await
            .unwrap();
        app.messages().mark_seen(&message.message_id).await.unwrap();
        app.shutdown().await;
        (alice, message)
    };

    let app = ChatApp::start(&config).await.unwrap();
    let mut alice_sub = app.presence().connect(alice.user_id.clone());

    assert_eq!(
        next_chat_event(&mut alice_sub, EVENT_TIMEOUT).await,
        Some(ChatEvent::DeleteMessage {
            message_id: message.message_id.clone()
        })
    );
    let conversation = app
        .messages()
        .list_conversation(&message.sender_id, &message.receiver_id)
        .await
        .unwrap();
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn test_overdue_deadline_fires_on_start() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let message = {
        let app = ChatApp::start(&config).await.unwrap();
        let alice = register(&app, "Alice").await;
        let bob = register(&app, "Bob").await;
        let message = app
            .messages()
            .send(&alice.user_id, &bob.user_id, SendMessage::text("stale").vanishing())
            .await
            .unwrap();
        app.messages().mark_seen(&message.message_id).await.unwrap();
        app.shutdown().await;
        message
    };

    // Let the deadline pass while nothing is running.
    tokio::time::sleep(TEST_VANISH_DELAY * 2).await;

    let app = ChatApp::start(&config).await.unwrap();
    let mut sender_sub = app.presence().connect(message.sender_id.clone());
    assert_eq!(
        next_chat_event(&mut sender_sub, EVENT_TIMEOUT).await,
        Some(ChatEvent::DeleteMessage {
            message_id: message.message_id.clone()
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_mark_seen_deletes_once() {
    let (_dir, app) = start_app().await;
    let app = Arc::new(app);
    let alice = register(&app, "Alice").await;
    let bob = register(&app, "Bob").await;
    let mut alice_sub = app.presence().connect(alice.user_id.clone());
    let mut bob_sub = app.presence().connect(bob.user_id.clone());

    let message = app
        .messages()
        .send(&alice.user_id, &bob.user_id, SendMessage::text("race").vanishing())
        .await
        .unwrap();
    assert!(matches!(
        next_chat_event(&mut bob_sub, EVENT_TIMEOUT).await,
        Some(ChatEvent::NewMessage(_))
    ));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let app = app.clone();
            let message_id = message.message_id.clone();
            tokio::spawn(async move { app.messages().mark_seen(&message_id).await })
        })
        .collect();
    for task in tasks {
        task.await
            .expect("mark_seen task panicked")
            .expect("concurrent mark_seen failed");
    }

    let expected = ChatEvent::DeleteMessage {
        message_id: message.message_id.clone(),
    };
    assert_eq!(next_chat_event(&mut alice_sub, EVENT_TIMEOUT).await, Some(expected.clone()));
    assert_eq!(next_chat_event(&mut bob_sub, EVENT_TIMEOUT).await, Some(expected));

    tokio::time::sleep(TEST_VANISH_DELAY * 3).await;
    assert!(queued_chat_events(&mut alice_sub).is_empty());
    assert!(queued_chat_events(&mut bob_sub).is_empty());
    assert_eq!(app.messages().vanish().pending_count().await, 0);
}

#[tokio::test]
async fn test_both_parties_offline_deletes_without_events() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let alice = UserRecord::new("alice@example.com".to_string(), "Alice".to_string(), None);
    let bob = UserRecord::new("bob@example.com".to_string(), "Bob".to_string(), None);
    let message = MessageRecord::new(
        alice.user_id.clone(),
        bob.user_id.clone(),
        Some("nobody home".to_string()),
        None,
        true,
    );
    store
        .with_transaction(|tx| -> Result<(), StoreError> {
            tx.create_user(&alice)?;
            tx.create_user(&bob)?;
            tx.insert_message(&message)
        })
        .unwrap();

    let channel = Arc::new(OfflineChannel::default());
    let controller = VanishController::new(store.clone(), channel.clone(), TEST_VANISH_DELAY);
    controller.mark_seen(&message.message_id).await.unwrap();

    tokio::time::sleep(TEST_VANISH_DELAY * 3).await;

    let id = message.message_id.clone();
    let remaining = store.with_transaction(|tx| tx.find_message(&id)).unwrap();
    assert_eq!(remaining, None);
    assert!(channel.emitted.lock().unwrap().is_empty());

    let mut lookups = channel.lookups.lock().unwrap().clone();
    lookups.sort();
    let mut expected = vec![alice.user_id.clone(), bob.user_id.clone()];
    expected.sort();
    assert_eq!(lookups, expected);

    controller.shutdown().await;
}
