use crate::libs::core::models::{MessageId, Timestamp, UserId};
use crate::libs::storage::records::{MessageRecord, PendingDeletion, UserRecord};
use thiserror::Error;

pub trait Transactional {
    fn commit(self) -> Result<(), StoreError>;
    fn rollback(self) -> Result<(), StoreError>;
}

pub trait UserStore {
    fn create_user(&mut self, record: &UserRecord) -> Result<(), StoreError>;
    fn load_user_by_id(&mut self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError>;
    fn load_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError>;
}

pub trait ContactStore {
    /// Stores the relation in both directions. Returns false if it already existed.
    fn add_contact(&mut self, user_id: &UserId, contact_id: &UserId) -> Result<bool, StoreError>;
    fn load_contacts(&mut self, user_id: &UserId) -> Result<Vec<UserRecord>, StoreError>;
    fn is_contact(&mut self, user_id: &UserId, contact_id: &UserId) -> Result<bool, StoreError>;
}

/// Outcome of the guarded seen write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenUpdate {
    /// The message moved from unseen to seen by this call.
    Transitioned { vanish_deadline: Option<Timestamp> },
    AlreadySeen,
    NotFound,
}

pub trait MessageStore {
    fn insert_message(&mut self, message: &MessageRecord) -> Result<(), StoreError>;

    fn find_message(&mut self, message_id: &MessageId) -> Result<Option<MessageRecord>, StoreError>;

    /// Sets `seen` and, for vanish messages, the `delete_at` deadline in one statement.
    fn mark_seen(
        &mut self,
        message_id: &MessageId,
        vanish_deadline: Timestamp,
    ) -> Result<SeenUpdate, StoreError>;

    fn delete_message(&mut self, message_id: &MessageId)
        -> Result<Option<MessageRecord>, StoreError>;

    fn find_conversation(
        &mut self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    fn load_pending_deletions(&mut self) -> Result<Vec<PendingDeletion>, StoreError>;
}

pub trait ChatStore: UserStore + ContactStore + MessageStore {}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sqlite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ConnectionPool Error: {0}")]
    ConnectionPool(#[from] r2d2::Error),
    #[error("User Already Exists: {0}")]
    UserAlreadyExists(String),
    #[error("Migration Error: {0}")]
    Migration(String),
    #[error("Background Task Error: {0}")]
    BackgroundTask(#[from] tokio::task::JoinError),
}
