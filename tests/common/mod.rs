#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use vanish_chat::libs::config::ChatConfig;
use vanish_chat::libs::storage::database::storage_sqlite::SqliteStore;
use vanish_chat::{ChatApp, ChatEvent, Subscription, UserRecord};

pub const TEST_VANISH_DELAY: Duration = Duration::from_millis(200);
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// Every test gets its own database file; the TempDir must outlive the app.
pub fn test_config(dir: &TempDir) -> ChatConfig {
    ChatConfig {
        database_path: dir.path().join("chat.db"),
        pool_size: 4,
        vanish_delay: TEST_VANISH_DELAY,
        ..Default::default()
    }
}

pub async fn start_app() -> (TempDir, ChatApp) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let app = ChatApp::start(&test_config(&dir))
        .await
        .expect("Failed to start chat app");
    (dir, app)
}

pub fn open_store(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(dir.path().join("chat.db"), 2).expect("Failed to open store")
}

pub async fn register(app: &ChatApp, name: &str) -> UserRecord {
    app.contacts()
        .register_user(&format!("{}@example.com", name.to_lowercase()), name, None)
        .await
        .unwrap_or_else(|e| panic!("Failed to register {}: {}", name, e))
}

/// Next event that is not a presence broadcast, or None on timeout.
pub async fn next_chat_event(subscription: &mut Subscription, wait: Duration) -> Option<ChatEvent> {
    timeout(wait, async {
        loop {
            match subscription.events.recv().await {
                Some(ChatEvent::OnlineUsers(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drains whatever is already queued, ignoring presence broadcasts.
pub fn queued_chat_events(subscription: &mut Subscription) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = subscription.events.try_recv() {
        if !matches!(event, ChatEvent::OnlineUsers(_)) {
            events.push(event);
        }
    }
    events
}
