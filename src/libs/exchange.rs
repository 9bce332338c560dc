use crate::libs::core::models::{MessageId, UserId};
use crate::libs::presence::{ChatEvent, NotificationChannel};
use crate::libs::storage::database::storage_sqlite::SqliteStore;
use crate::libs::storage::records::MessageRecord;
use crate::libs::storage::storage_traits::{MessageStore, UserStore};
use crate::libs::vanish::VanishController;
use crate::ChatError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Body of a send request.
///
/// Neither `text` nor `image` is required; an empty message is stored as is.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub text: Option<String>,
    /// Reference to an already uploaded image (e.g. its URL).
    pub image: Option<String>,
    #[serde(default)]
    pub vanish_after_seen: bool,
}

impl SendMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn vanishing(mut self) -> Self {
        self.vanish_after_seen = true;
        self
    }
}

pub struct MessageService {
    store: SqliteStore,
    channel: Arc<dyn NotificationChannel>,
    vanish: VanishController,
}

impl MessageService {
    pub fn new(
        store: SqliteStore,
        channel: Arc<dyn NotificationChannel>,
        vanish: VanishController,
    ) -> Self {
        Self {
            store,
            channel,
            vanish,
        }
    }

    pub fn vanish(&self) -> &VanishController {
        &self.vanish
    }

    /// Persists a message and pushes it to the receiver if they are online.
    /// Both users must exist.
    #[instrument(skip_all, fields(sender = %sender, receiver = %receiver))]
    pub async fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        request: SendMessage,
    ) -> Result<MessageRecord, ChatError> {
        let message = MessageRecord::new(
            sender.clone(),
            receiver.clone(),
            request.text,
            request.image,
            request.vanish_after_seen,
        );

        let record = message.clone();
        self.store
            .run_blocking(move |tx| -> Result<(), ChatError> {
                for user_id in [&record.sender_id, &record.receiver_id] {
                    if tx.load_user_by_id(user_id)?.is_none() {
                        return Err(ChatError::NotFound(format!("user {}", user_id)));
                    }
                }
                tx.insert_message(&record)?;
                Ok(())
            })
            .await?;

        debug!(message_id = %message.message_id, vanish = message.vanish_after_seen, "Message stored");
        self.channel
            .notify(receiver, ChatEvent::NewMessage(message.clone()));
        Ok(message)
    }

    /// Every message between the two users, oldest first.
    pub async fn list_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<MessageRecord>, ChatError> {
        let (a, b) = (user_a.clone(), user_b.clone());
        let messages = self
            .store
            .run_blocking(move |tx| tx.find_conversation(&a, &b))
            .await?;
        Ok(messages)
    }

    pub async fn mark_seen(&self, message_id: &MessageId) -> Result<(), ChatError> {
        self.vanish.mark_seen(message_id).await
    }
}
