//! Durable storage for the sync state snapshot.
//!
//! The whole [`SyncStateStore`](walletsync_core::SyncStateStore) is persisted
//! as one JSON document. Backends only move that document in and out; the
//! schema check happens in [`SharedState`](crate::SharedState) before the
//! in-memory store is touched.

mod memory;
mod sqlite;

pub use memory::MemoryStateStorage;
pub use sqlite::{SqliteStateStorage, DEFAULT_STATE_KEY};

use async_trait::async_trait;
use walletsync_core::SnapshotError;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The snapshot could not be produced or was rejected on load.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Backend holding the persisted snapshot.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Read the snapshot JSON, if one was ever saved.
    async fn load(&self) -> Result<Option<String>, StorageError>;

    /// Replace the snapshot JSON.
    async fn save(&self, snapshot: &str) -> Result<(), StorageError>;
}
