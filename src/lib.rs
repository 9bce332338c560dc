pub mod libs;

use crate::libs::config::ChatConfig;
use crate::libs::contacts::ContactService;
use crate::libs::exchange::MessageService;
use crate::libs::presence::{NotificationChannel, PresenceRegistry};
use crate::libs::storage::database::storage_sqlite::SqliteStore;
use crate::libs::storage::storage_traits::StoreError;
use crate::libs::vanish::VanishController;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use crate::libs::core::models::{MessageId, UserId};
pub use crate::libs::exchange::SendMessage;
pub use crate::libs::presence::{ChatEvent, ConnectionHandle, Subscription};
pub use crate::libs::storage::records::{MessageRecord, UserRecord};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// HTTP status the boundary layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::NotFound(_) => 404,
            ChatError::Unauthorized => 401,
            ChatError::InvalidInput(_) => 400,
            ChatError::Conflict(_) => 409,
            ChatError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserAlreadyExists(email) => {
                ChatError::Conflict(format!("user {} already exists", email))
            }
            other => ChatError::Internal(other.to_string()),
        }
    }
}

/// The wired-up application: one store, one presence registry, one vanish scheduler.
pub struct ChatApp {
    presence: Arc<PresenceRegistry>,
    messages: MessageService,
    contacts: ContactService,
}

impl ChatApp {
    /// Opens the database, starts the vanish scheduler and re-arms persisted deadlines.
    pub async fn start(config: &ChatConfig) -> Result<Self, ChatError> {
        config
            .validate()
            .map_err(|e| ChatError::InvalidInput(e.to_string()))?;

        let path = config.database_path.clone();
        let pool_size = config.pool_size;
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(path, pool_size))
            .await
            .map_err(StoreError::from)??;

        let presence = Arc::new(PresenceRegistry::new());
        let channel: Arc<dyn NotificationChannel> = presence.clone();
        let vanish = VanishController::new(store.clone(), channel.clone(), config.vanish_delay);
        let recovered = vanish.recover_pending().await?;

        info!(
            database = %config.database_path.display(),
            vanish_delay = ?config.vanish_delay,
            recovered,
            "Chat app started"
        );

        Ok(Self {
            presence,
            messages: MessageService::new(store.clone(), channel, vanish),
            contacts: ContactService::new(store),
        })
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn contacts(&self) -> &ContactService {
        &self.contacts
    }

    /// Stops the vanish scheduler. Unfired deadlines stay in the database.
    pub async fn shutdown(&self) {
        self.messages.vanish().shutdown().await;
        info!("Chat app stopped");
    }
}
