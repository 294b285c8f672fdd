//! The process-wide sync state, shared between the orchestrator and the app.
//!
//! [`SharedState`] pairs the in-memory [`SyncStateStore`] with a durable
//! [`StateStorage`] backend and the member [`ColorGenerator`]. Reads and
//! writes go through short critical sections (`read` / `update`), and
//! `persist` writes a consistent snapshot. Persists are serialized so an
//! older snapshot can never overwrite a newer one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};
use walletsync_core::SyncStateStore;
use walletsync_types::{AccountId, TransactionToShare};

use crate::color::ColorGenerator;
use crate::storage::{StateStorage, StorageError};

/// Sync state store plus its persistence and colour collaborators.
pub struct SharedState {
    store: Mutex<SyncStateStore>,
    storage: Arc<dyn StateStorage>,
    colors: Arc<dyn ColorGenerator>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("accounts", &self.lock().account_ids().len())
            .finish_non_exhaustive()
    }
}

impl SharedState {
    /// Start from an empty store.
    pub fn new(storage: Arc<dyn StateStorage>, colors: Arc<dyn ColorGenerator>) -> Self {
        Self::with_store(SyncStateStore::new(), storage, colors)
    }

    fn with_store(
        store: SyncStateStore,
        storage: Arc<dyn StateStorage>,
        colors: Arc<dyn ColorGenerator>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            storage,
            colors,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Rehydrate from `storage`.
    ///
    /// A missing entry yields an empty store. An entry that fails schema
    /// validation (including an unsupported version) is refused and left
    /// untouched in storage.
    pub async fn load(
        storage: Arc<dyn StateStorage>,
        colors: Arc<dyn ColorGenerator>,
    ) -> Result<Self, StorageError> {
        let store = match storage.load().await? {
            Some(json) => match SyncStateStore::from_snapshot_str(&json) {
                Ok(store) => {
                    info!(accounts = store.account_ids().len(), "Loaded persisted sync state");
                    store
                }
                Err(e) => {
                    error!(error = %e, "Refusing to load persisted sync state");
                    return Err(e.into());
                }
            },
            None => {
                debug!("No persisted sync state, starting empty");
                SyncStateStore::new()
            }
        };
        Ok(Self::with_store(store, storage, colors))
    }

    fn lock(&self) -> MutexGuard<'_, SyncStateStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the store.
    pub fn read<R>(&self, f: impl FnOnce(&SyncStateStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` against the store mutably. Does not persist.
    pub fn update<R>(&self, f: impl FnOnce(&mut SyncStateStore) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone of the current store.
    pub fn snapshot(&self) -> SyncStateStore {
        self.lock().clone()
    }

    /// Write the current store to storage.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _serialized = self.persist_lock.lock().await;
        let json = self.lock().to_snapshot_string()?;
        self.storage.save(&json).await
    }

    /// Add a member with its derived colour, then persist.
    ///
    /// Returns false (and keeps the existing colour) if already present.
    pub async fn add_member(&self, account_id: &AccountId, npub: &str) -> Result<bool, StorageError> {
        if self.read(|s| s.has_member(account_id, npub)) {
            return Ok(false);
        }
        let color = self.colors.color_for(npub).await;
        let added = self.update(|s| s.add_member(account_id, npub, &color));
        if added {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Remove a member, then persist.
    pub async fn remove_member(&self, account_id: &AccountId, npub: &str) -> Result<bool, StorageError> {
        let removed = self.update(|s| s.remove_member(account_id, npub));
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Trust a device, then persist.
    pub async fn add_trusted_device(&self, account_id: &AccountId, npub: &str) -> Result<bool, StorageError> {
        let added = self.update(|s| s.add_trusted_device(account_id, npub));
        if added {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Stop trusting a device, then persist.
    pub async fn remove_trusted_device(
        &self,
        account_id: &AccountId,
        npub: &str,
    ) -> Result<bool, StorageError> {
        let removed = self.update(|s| s.remove_trusted_device(account_id, npub));
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Put a payload in the outbound mailbox (or empty it), then persist.
    pub async fn set_transaction_to_share(
        &self,
        payload: Option<TransactionToShare>,
    ) -> Result<(), StorageError> {
        self.update(|s| s.set_transaction_to_share(payload));
        self.persist().await
    }

    /// Reset one account's sync bookkeeping, then persist.
    pub async fn clear_nostr_state(&self, account_id: &AccountId) -> Result<(), StorageError> {
        self.update(|s| s.clear_nostr_state(account_id));
        info!(account = %account_id, "Cleared sync state");
        self.persist().await
    }

    /// Snapshot JSON for backup.
    pub fn export_snapshot(&self) -> Result<String, StorageError> {
        Ok(self.lock().to_snapshot_string()?)
    }

    /// Replace the whole store from a backup, then persist.
    ///
    /// The payload is validated first; on failure nothing changes.
    pub async fn import_snapshot(&self, json: &str) -> Result<(), StorageError> {
        let mut imported = SyncStateStore::from_snapshot_str(json)?;
        {
            let mut store = self.lock();
            for account_id in store.account_ids() {
                if store.is_syncing(&account_id) {
                    imported.set_syncing(&account_id, true);
                }
            }
            *store = imported;
        }
        info!("Imported sync state snapshot");
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::HashColorGenerator;
    use crate::storage::MemoryStateStorage;
    use walletsync_core::SnapshotError;

    fn acct(id: &str) -> AccountId {
        AccountId::from(id)
    }

    fn shared(storage: &Arc<MemoryStateStorage>) -> SharedState {
        SharedState::new(storage.clone(), Arc::new(HashColorGenerator))
    }

    // ===== Loading =====

    #[tokio::test]
    async fn load_from_empty_storage() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = SharedState::load(storage, Arc::new(HashColorGenerator))
            .await
            .unwrap();
        assert!(state.read(|s| s.account_ids().is_empty()));
    }

    #[tokio::test]
    async fn persist_then_load_restores_store() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);
        state.add_member(&acct("a"), "npub1alice").await.unwrap();
        state.update(|s| {
            s.add_processed_message_id(&acct("a"), "m1");
            s.set_last_protocol_eose(&acct("a"), 1_700_000_000);
        });
        state.persist().await.unwrap();

        let reloaded = SharedState::load(storage.clone(), Arc::new(HashColorGenerator))
            .await
            .unwrap();
        assert_eq!(reloaded.snapshot(), state.snapshot());
    }

    #[tokio::test]
    async fn unsupported_version_is_refused_and_kept() {
        let stored = r#"{"version":99,"accounts":{}}"#;
        let storage = Arc::new(MemoryStateStorage::with_snapshot(stored));
        let err = SharedState::load(storage.clone(), Arc::new(HashColorGenerator))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Snapshot(SnapshotError::UnsupportedVersion(99))
        ));
        assert_eq!(storage.snapshot().as_deref(), Some(stored));
    }

    #[tokio::test]
    async fn malformed_snapshot_is_refused() {
        let storage = Arc::new(MemoryStateStorage::with_snapshot(
            r#"{"version":1,"accounts":{"a":{"members":"nope"}}}"#,
        ));
        let err = SharedState::load(storage, Arc::new(HashColorGenerator))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Snapshot(SnapshotError::Invalid(_))));
    }

    // ===== Mutations =====

    #[tokio::test]
    async fn add_member_derives_color_and_persists() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);

        assert!(state.add_member(&acct("a"), "npub1alice").await.unwrap());
        assert!(!state.add_member(&acct("a"), "npub1alice").await.unwrap());

        let expected = HashColorGenerator.color_for("npub1alice").await;
        state.read(|s| {
            let members = s.get_members(&acct("a"));
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].color, expected);
        });
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn mailbox_set_and_clear_persist() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);

        let share = TransactionToShare::new("sign please", "cHNidP8B");
        state.set_transaction_to_share(Some(share.clone())).await.unwrap();
        assert_eq!(state.read(|s| s.transaction_to_share.clone()), Some(share));
        assert!(storage.snapshot().unwrap().contains("cHNidP8B"));

        state.set_transaction_to_share(None).await.unwrap();
        assert_eq!(state.read(|s| s.transaction_to_share.clone()), None);
        assert_eq!(storage.save_count(), 2);
    }

    #[tokio::test]
    async fn clear_nostr_state_is_scoped_and_persisted() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);
        state.update(|s| {
            s.add_processed_event(&acct("a"), "e1");
            s.add_processed_event(&acct("b"), "e1");
        });

        state.clear_nostr_state(&acct("a")).await.unwrap();

        assert!(!state.read(|s| s.is_event_processed(&acct("a"), "e1")));
        assert!(state.read(|s| s.is_event_processed(&acct("b"), "e1")));
        assert_eq!(storage.save_count(), 1);
    }

    // ===== Backup / restore =====

    #[tokio::test]
    async fn import_rejects_invalid_without_changes() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);
        state.update(|s| s.add_trusted_device(&acct("a"), "npub1dev"));

        let result = state
            .import_snapshot(r#"{"version":1,"accounts":{"a":{"trustedDevices":[1]}}}"#)
            .await;
        assert!(result.is_err());
        assert_eq!(state.read(|s| s.get_trusted_devices(&acct("a")).to_vec()), vec!["npub1dev"]);
        assert_eq!(storage.save_count(), 0);
    }

    #[tokio::test]
    async fn export_import_round_trip() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = shared(&storage);
        state.add_member(&acct("a"), "npub1alice").await.unwrap();
        state.update(|s| s.add_processed_message_id(&acct("a"), "m1"));
        let backup = state.export_snapshot().unwrap();

        let other = shared(&Arc::new(MemoryStateStorage::new()));
        other.import_snapshot(&backup).await.unwrap();
        assert_eq!(other.snapshot(), state.snapshot());
    }
}
