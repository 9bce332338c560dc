use crate::libs::core::models::{MessageId, Timestamp, UserId};
use crate::libs::storage::database::migrations;
use crate::libs::storage::records::{MessageRecord, PendingDeletion, UserRecord};
use crate::libs::storage::storage_traits::{
    ChatStore, ContactStore, MessageStore, SeenUpdate, StoreError, Transactional, UserStore,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const MESSAGE_COLUMNS: &str = "message_id, sender_id, receiver_id, text, image, seen, \
                               vanish_after_seen, delete_at, created_at";
const USER_COLUMNS: &str = "user_id, email, full_name, profile_pic, created_at";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SqliteTransaction<'conn> {
    /// Begins an IMMEDIATE transaction; lock waits go through the busy timeout.
    pub fn new(
        conn: &'conn mut PooledConnection<SqliteConnectionManager>,
    ) -> Result<Self, StoreError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }

    pub fn inner(&self) -> &Transaction<'conn> {
        &self.tx
    }
}

impl<'conn> Transactional for SqliteTransaction<'conn> {
    fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit()?)
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(self.tx.rollback()?)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn_pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `db_path` and brings its schema up to date.
    pub fn open(db_path: impl AsRef<Path>, pool_size: u32) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|conn| {
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            Ok(())
        });
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        let store = Self { conn_pool: pool };
        migrations::migrate(&store)?;
        Ok(store)
    }

    pub fn new_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.conn_pool.get()?)
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut SqliteTransaction<'_>) -> Result<T, E>,
    {
        let mut connection = self.new_connection()?;
        let mut sqlite_transaction = SqliteTransaction::new(&mut connection)?;
        match f(&mut sqlite_transaction) {
            Ok(value) => {
                sqlite_transaction.commit()?;
                Ok(value)
            }
            Err(err) => {
                sqlite_transaction.rollback()?;
                Err(err)
            }
        }
    }

    /// [`with_transaction`](Self::with_transaction) on the blocking thread pool.
    pub async fn run_blocking<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut SqliteTransaction<'_>) -> Result<T, E> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_transaction(f))
            .await
            .map_err(|err| E::from(StoreError::from(err)))?
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord::from_db(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl<'conn> ChatStore for SqliteTransaction<'conn> {}

impl<'conn> UserStore for SqliteTransaction<'conn> {
    fn create_user(&mut self, record: &UserRecord) -> Result<(), StoreError> {
        let result = self.tx.execute(
            "INSERT INTO users (user_id, email, full_name, profile_pic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.user_id,
                record.email,
                record.full_name,
                record.profile_pic,
                record.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::UserAlreadyExists(record.email.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn load_user_by_id(&mut self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        let user = self
            .tx
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn load_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = self
            .tx
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}

impl<'conn> ContactStore for SqliteTransaction<'conn> {
    fn add_contact(&mut self, user_id: &UserId, contact_id: &UserId) -> Result<bool, StoreError> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT OR IGNORE INTO contacts (user_id, contact_id) VALUES (?1, ?2)",
        )?;
        let forward = stmt.execute(params![user_id, contact_id])?;
        let backward = stmt.execute(params![contact_id, user_id])?;
        Ok(forward + backward > 0)
    }

    fn load_contacts(&mut self, user_id: &UserId) -> Result<Vec<UserRecord>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT u.user_id, u.email, u.full_name, u.profile_pic, u.created_at
             FROM contacts c
             JOIN users u ON u.user_id = c.contact_id
             WHERE c.user_id = ?1
             ORDER BY u.full_name COLLATE NOCASE, u.email",
        )?;
        let contacts = stmt
            .query_map(params![user_id], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    fn is_contact(&mut self, user_id: &UserId, contact_id: &UserId) -> Result<bool, StoreError> {
        let exists = self
            .tx
            .query_row(
                "SELECT 1 FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
                params![user_id, contact_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

impl<'conn> MessageStore for SqliteTransaction<'conn> {
    fn insert_message(&mut self, message: &MessageRecord) -> Result<(), StoreError> {
        self.tx.execute(
            &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                message.message_id,
                message.sender_id,
                message.receiver_id,
                message.text,
                message.image,
                message.seen,
                message.vanish_after_seen,
                message.delete_at,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    fn find_message(&mut self, message_id: &MessageId) -> Result<Option<MessageRecord>, StoreError> {
        let message = self
            .tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn mark_seen(
        &mut self,
        message_id: &MessageId,
        vanish_deadline: Timestamp,
    ) -> Result<SeenUpdate, StoreError> {
        // Guarded on seen = 0 so only one caller ever observes the transition.
        let transitioned: Option<Option<Timestamp>> = self
            .tx
            .query_row(
                "UPDATE messages
                 SET seen = 1,
                     delete_at = CASE WHEN vanish_after_seen THEN ?2 ELSE NULL END
                 WHERE message_id = ?1 AND seen = 0
                 RETURNING delete_at",
                params![message_id, vanish_deadline],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(vanish_deadline) = transitioned {
            return Ok(SeenUpdate::Transitioned { vanish_deadline });
        }

        let exists = self
            .tx
            .query_row(
                "SELECT 1 FROM messages WHERE message_id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        Ok(if exists {
            SeenUpdate::AlreadySeen
        } else {
            SeenUpdate::NotFound
        })
    }

    fn delete_message(
        &mut self,
        message_id: &MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let deleted = self
            .tx
            .query_row(
                &format!("DELETE FROM messages WHERE message_id = ?1 RETURNING {MESSAGE_COLUMNS}"),
                params![message_id],
                message_from_row,
            )
            .optional()?;
        Ok(deleted)
    }

    fn find_conversation(
        &mut self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY rowid"
        ))?;
        let messages = stmt
            .query_map(params![user_a, user_b], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn load_pending_deletions(&mut self) -> Result<Vec<PendingDeletion>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT message_id, delete_at FROM messages
             WHERE seen = 1 AND vanish_after_seen = 1 AND delete_at IS NOT NULL
             ORDER BY delete_at",
        )?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingDeletion {
                    message_id: row.get(0)?,
                    delete_at: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }
}
