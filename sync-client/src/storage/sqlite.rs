//! SQLite state storage.

use super::{StateStorage, StorageError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Key the snapshot is stored under unless configured otherwise.
pub const DEFAULT_STATE_KEY: &str = "nostr-sync-state";

/// SQLite-backed snapshot storage.
///
/// Uses a small key-value table; the snapshot is a single row under
/// `state_key`. WAL mode keeps the CLI able to read while an app writes.
#[derive(Debug, Clone)]
pub struct SqliteStateStorage {
    pool: SqlitePool,
    state_key: String,
}

impl SqliteStateStorage {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path, state_key: impl Into<String>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            state_key: state_key.into(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            state_key: DEFAULT_STATE_KEY.to_string(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// The key the snapshot row lives under.
    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// When the snapshot was last written (unix seconds).
    pub async fn updated_at(&self) -> Result<Option<i64>, StorageError> {
        let updated: Option<Option<i64>> =
            sqlx::query_scalar("SELECT updated_at FROM kv_store WHERE key = ?1")
                .bind(&self.state_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(updated.flatten())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStorage for SqliteStateStorage {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
            .bind(&self.state_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn save(&self, snapshot: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.state_key)
        .bind(snapshot)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
