use crate::libs::core::models::{now_millis, MessageId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: UserId,
    pub email: String,
    pub full_name: String,
    pub profile_pic: Option<String>,
    pub created_at: Timestamp,
}

impl UserRecord {
    pub fn new(email: String, full_name: String, profile_pic: Option<String>) -> Self {
        Self {
            user_id: UserId::generate(),
            email,
            full_name,
            profile_pic,
            created_at: now_millis(),
        }
    }
}

/// A chat message as persisted in the `messages` table.
///
/// `delete_at` is only set once a vanish-after-seen message has been seen and
/// holds the deadline at which it is removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
    pub seen: bool,
    pub vanish_after_seen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl MessageRecord {
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        image: Option<String>,
        vanish_after_seen: bool,
    ) -> Self {
        Self {
            message_id: MessageId::generate(),
            sender_id,
            receiver_id,
            text,
            image,
            seen: false,
            vanish_after_seen,
            delete_at: None,
            created_at: now_millis(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_db(
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        image: Option<String>,
        seen: bool,
        vanish_after_seen: bool,
        delete_at: Option<Timestamp>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            message_id,
            sender_id,
            receiver_id,
            text,
            image,
            seen,
            vanish_after_seen,
            delete_at,
            created_at,
        }
    }

    /// Both parties of the conversation, receiver dropped when it is the sender.
    pub fn participants(&self) -> Vec<&UserId> {
        if self.sender_id == self.receiver_id {
            vec![&self.sender_id]
        } else {
            vec![&self.sender_id, &self.receiver_id]
        }
    }
}

/// A seen vanish message whose deletion deadline is persisted but not yet reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDeletion {
    pub message_id: MessageId,
    pub delete_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_starts_unseen() {
        let message = MessageRecord::new(
            UserId::generate(),
            UserId::generate(),
            Some("hi".to_string()),
            None,
            true,
        );
        assert!(!message.seen);
        assert!(message.vanish_after_seen);
        assert_eq!(message.delete_at, None);
        assert_eq!(message.participants().len(), 2);
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let message = MessageRecord::new(
            UserId::generate(),
            UserId::generate(),
            None,
            Some("https://img.example/1.png".to_string()),
            false,
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["messageId"], message.message_id.to_string());
        assert_eq!(value["vanishAfterSeen"], false);
        assert!(value.get("deleteAt").is_none());
    }

    #[test]
    fn test_note_to_self_has_one_participant() {
        let me = UserId::generate();
        let message = MessageRecord::new(me.clone(), me.clone(), None, None, false);
        assert_eq!(message.participants(), vec![&me]);
    }
}
