//! In-memory state storage.

use super::{StateStorage, StorageError};
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps the snapshot in memory. For tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryStateStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<String>,
    saves: usize,
}

impl MemoryStateStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-seeded with a snapshot.
    pub fn with_snapshot(snapshot: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                snapshot: Some(snapshot.into()),
                saves: 0,
            }),
        }
    }

    /// The last saved snapshot.
    pub fn snapshot(&self) -> Option<String> {
        self.lock().snapshot.clone()
    }

    /// Number of `save()` calls.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.snapshot())
    }

    async fn save(&self, snapshot: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.snapshot = Some(snapshot.to_string());
        inner.saves += 1;
        Ok(())
    }
}
