use crate::libs::core::models::UserId;
use crate::libs::storage::database::storage_sqlite::SqliteStore;
use crate::libs::storage::records::UserRecord;
use crate::libs::storage::storage_traits::{ContactStore, UserStore};
use crate::ChatError;
use tracing::{info, instrument};

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct ContactService {
    store: SqliteStore,
}

impl ContactService {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Creates the account row for a new user. Emails are unique, case-insensitively.
    #[instrument(skip(self, profile_pic))]
    pub async fn register_user(
        &self,
        email: &str,
        full_name: &str,
        profile_pic: Option<String>,
    ) -> Result<UserRecord, ChatError> {
        let email = normalize_email(email);
        let full_name = full_name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(ChatError::InvalidInput(format!("invalid email: {:?}", email)));
        }
        if full_name.is_empty() {
            return Err(ChatError::InvalidInput("full name is required".to_string()));
        }

        let user = UserRecord::new(email, full_name, profile_pic);
        let record = user.clone();
        self.store
            .run_blocking(move |tx| tx.create_user(&record))
            .await?;

        info!(user_id = %user.user_id, "User registered");
        Ok(user)
    }

    pub async fn load_user(&self, user_id: &UserId) -> Result<UserRecord, ChatError> {
        let id = user_id.clone();
        self.store
            .run_blocking(move |tx| tx.load_user_by_id(&id))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user {}", user_id)))
    }

    /// Looks up another user by email so they can be added as a contact.
    #[instrument(skip(self))]
    pub async fn search_by_email(
        &self,
        actor: &UserId,
        email: &str,
    ) -> Result<UserRecord, ChatError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ChatError::InvalidInput("email is required".to_string()));
        }

        let lookup = email.clone();
        let user = self
            .store
            .run_blocking(move |tx| tx.load_user_by_email(&lookup))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user with email {}", email)))?;

        if &user.user_id == actor {
            return Err(ChatError::InvalidInput(
                "cannot search for yourself".to_string(),
            ));
        }
        Ok(user)
    }

    /// Makes the two users contacts of each other. Adding an existing contact is a no-op.
    #[instrument(skip(self))]
    pub async fn add_contact(
        &self,
        actor: &UserId,
        contact_id: &UserId,
    ) -> Result<UserRecord, ChatError> {
        if actor == contact_id {
            return Err(ChatError::InvalidInput(
                "cannot add yourself as a contact".to_string(),
            ));
        }

        let (user_id, other_id) = (actor.clone(), contact_id.clone());
        let (contact, added) = self
            .store
            .run_blocking(move |tx| -> Result<(UserRecord, bool), ChatError> {
                if tx.load_user_by_id(&user_id)?.is_none() {
                    return Err(ChatError::NotFound(format!("user {}", user_id)));
                }
                let contact = tx
                    .load_user_by_id(&other_id)?
                    .ok_or_else(|| ChatError::NotFound(format!("user {}", other_id)))?;
                let added = tx.add_contact(&user_id, &other_id)?;
                Ok((contact, added))
            })
            .await?;

        if added {
            info!("Contact added");
        }
        Ok(contact)
    }

    pub async fn list_contacts(&self, actor: &UserId) -> Result<Vec<UserRecord>, ChatError> {
        let id = actor.clone();
        let contacts = self
            .store
            .run_blocking(move |tx| tx.load_contacts(&id))
            .await?;
        Ok(contacts)
    }

    pub async fn are_contacts(&self, user_a: &UserId, user_b: &UserId) -> Result<bool, ChatError> {
        let (a, b) = (user_a.clone(), user_b.clone());
        let related = self
            .store
            .run_blocking(move |tx| tx.is_contact(&a, &b))
            .await?;
        Ok(related)
    }
}
