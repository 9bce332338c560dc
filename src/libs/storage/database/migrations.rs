use crate::libs::storage::database::storage_sqlite::{SqliteStore, SqliteTransaction};
use crate::libs::storage::storage_traits::{StoreError, Transactional};
use rusqlite::OptionalExtension;
use tracing::{debug, info};

pub const SCHEMA_VERSION: i64 = 1;

pub(crate) fn migrate(store: &SqliteStore) -> Result<(), StoreError> {
    let mut connection = store.new_connection()?;
    let sqlite_transaction = SqliteTransaction::new(&mut connection)?;

    sqlite_transaction.inner().execute_batch(
        "CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    let current: Option<i64> = sqlite_transaction
        .inner()
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM app_settings WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match current {
        Some(version) if version == SCHEMA_VERSION => {
            debug!(version, "Database schema up to date");
            return sqlite_transaction.commit();
        }
        Some(version) if version > SCHEMA_VERSION => {
            return Err(StoreError::Migration(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        _ => {}
    }

    sqlite_transaction.inner().execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            profile_pic TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            user_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),

            PRIMARY KEY (user_id, contact_id),
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE,
            FOREIGN KEY (contact_id) REFERENCES users(user_id) ON DELETE CASCADE,
            CHECK (user_id <> contact_id)
        );

        -- rowid order is the insertion order conversations are read back in
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            text TEXT,
            image TEXT,
            seen BOOLEAN NOT NULL DEFAULT false,
            vanish_after_seen BOOLEAN NOT NULL DEFAULT false,
            delete_at INTEGER,
            created_at INTEGER NOT NULL,

            FOREIGN KEY (sender_id) REFERENCES users(user_id) ON DELETE CASCADE,
            FOREIGN KEY (receiver_id) REFERENCES users(user_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(sender_id, receiver_id);
        CREATE INDEX IF NOT EXISTS idx_messages_pending_delete
            ON messages(delete_at) WHERE delete_at IS NOT NULL;",
    )?;

    sqlite_transaction.inner().execute(
        "INSERT INTO app_settings (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                        updated_at = strftime('%s', 'now')",
        [SCHEMA_VERSION.to_string()],
    )?;

    sqlite_transaction.commit()?;
    info!(version = SCHEMA_VERSION, "Database schema migrated");
    Ok(())
}
