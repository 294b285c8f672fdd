//! Dedup and bookkeeping state for synchronized accounts.
//!
//! [`SyncStateStore`] holds, per account:
//! - the group member list
//! - processed message-id and relay-event-id sets (redelivery dedup)
//! - EOSE checkpoints for resuming subscriptions
//! - trusted device list
//! - a volatile "syncing" flag
//!
//! plus one global outbound mailbox ([`TransactionToShare`]).
//!
//! Per-account structures are created lazily on first mutation. Reads for an
//! unknown account return empty/default values, never an error. Only
//! [`SyncStateStore::clear_nostr_state`] resets an account.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use walletsync_types::{AccountId, Member, TransactionToShare};

/// Insertion-ordered set of string ids with O(1) membership checks.
///
/// Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct OrderedIdSet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl OrderedIdSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id. Returns false (and changes nothing) if already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.index.contains(id) {
            return false;
        }
        self.index.insert(id.to_string());
        self.order.push(id.to_string());
        true
    }

    /// Check membership.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Remove an id. Returns true if it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.index.remove(id) {
            return false;
        }
        self.order.retain(|existing| existing != id);
        true
    }

    /// Ids in insertion order.
    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove every id.
    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }
}

impl From<Vec<String>> for OrderedIdSet {
    fn from(ids: Vec<String>) -> Self {
        let mut set = Self::new();
        for id in &ids {
            set.insert(id);
        }
        set
    }
}

impl From<OrderedIdSet> for Vec<String> {
    fn from(set: OrderedIdSet) -> Self {
        set.order
    }
}

/// Everything tracked for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncState {
    /// Group members, unique by npub.
    #[serde(default)]
    pub members: Vec<Member>,
    /// Decrypted message ids already handed to the processor.
    #[serde(default)]
    pub processed_message_ids: OrderedIdSet,
    /// Relay event ids already handled (processed, duplicate or undecryptable).
    #[serde(default)]
    pub processed_events: OrderedIdSet,
    /// Newest EOSE seen on the protocol channel (unix seconds).
    #[serde(default, rename = "lastProtocolEOSE")]
    pub last_protocol_eose: Option<u64>,
    /// Newest EOSE seen on the data-exchange channel (unix seconds).
    #[serde(default, rename = "lastDataExchangeEOSE")]
    pub last_data_exchange_eose: Option<u64>,
    /// Trusted device npubs, unique, insertion-ordered.
    #[serde(default)]
    pub trusted_devices: Vec<String>,
    /// Drain in progress. Volatile: never persisted.
    #[serde(skip)]
    pub syncing: bool,
}

impl AccountSyncState {
    /// Drop duplicate members and trusted devices, keeping first occurrences.
    pub(crate) fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.members.retain(|m| seen.insert(m.npub.clone()));
        let mut seen = HashSet::new();
        self.trusted_devices.retain(|d| seen.insert(d.clone()));
    }
}

/// The whole synchronization bookkeeping store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateStore {
    #[serde(default)]
    accounts: BTreeMap<AccountId, AccountSyncState>,
    /// Outbound mailbox. Overwritten on set, emptied on clear.
    #[serde(default)]
    pub transaction_to_share: Option<TransactionToShare>,
}

impl SyncStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an account's state, if it has ever been touched.
    pub fn account(&self, account_id: &AccountId) -> Option<&AccountSyncState> {
        self.accounts.get(account_id)
    }

    /// Ids of every account with stored state.
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().cloned().collect()
    }

    fn entry(&mut self, account_id: &AccountId) -> &mut AccountSyncState {
        self.accounts.entry(account_id.clone()).or_default()
    }

    // --- Members ---

    /// Add a member. Returns false if the npub is already a member.
    pub fn add_member(&mut self, account_id: &AccountId, npub: &str, color: &str) -> bool {
        let state = self.entry(account_id);
        if state.members.iter().any(|m| m.npub == npub) {
            return false;
        }
        state.members.push(Member {
            npub: npub.to_string(),
            color: color.to_string(),
        });
        true
    }

    /// Check whether `npub` is already a member.
    pub fn has_member(&self, account_id: &AccountId, npub: &str) -> bool {
        self.get_members(account_id).iter().any(|m| m.npub == npub)
    }

    /// Remove a member. Returns true if it was present.
    pub fn remove_member(&mut self, account_id: &AccountId, npub: &str) -> bool {
        match self.accounts.get_mut(account_id) {
            Some(state) => {
                let before = state.members.len();
                state.members.retain(|m| m.npub != npub);
                state.members.len() != before
            }
            None => false,
        }
    }

    /// Members of an account (empty for unknown accounts).
    pub fn get_members(&self, account_id: &AccountId) -> &[Member] {
        self.accounts
            .get(account_id)
            .map(|s| s.members.as_slice())
            .unwrap_or(&[])
    }

    // --- Dedup ---

    /// Record a processed message id. Returns false if already recorded.
    pub fn add_processed_message_id(&mut self, account_id: &AccountId, id: &str) -> bool {
        self.entry(account_id).processed_message_ids.insert(id)
    }

    /// Check whether a message id has been processed.
    pub fn is_message_processed(&self, account_id: &AccountId, id: &str) -> bool {
        self.accounts
            .get(account_id)
            .is_some_and(|s| s.processed_message_ids.contains(id))
    }

    /// Processed message ids in insertion order.
    pub fn get_processed_message_ids(&self, account_id: &AccountId) -> &[String] {
        self.accounts
            .get(account_id)
            .map(|s| s.processed_message_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Forget every processed message id for an account.
    pub fn clear_processed_message_ids(&mut self, account_id: &AccountId) {
        if let Some(state) = self.accounts.get_mut(account_id) {
            state.processed_message_ids.clear();
        }
    }

    /// Record a processed relay event id. Returns false if already recorded.
    pub fn add_processed_event(&mut self, account_id: &AccountId, event_id: &str) -> bool {
        self.entry(account_id).processed_events.insert(event_id)
    }

    /// Check whether a relay event has been handled.
    pub fn is_event_processed(&self, account_id: &AccountId, event_id: &str) -> bool {
        self.accounts
            .get(account_id)
            .is_some_and(|s| s.processed_events.contains(event_id))
    }

    /// Processed relay event ids in insertion order.
    pub fn get_processed_events(&self, account_id: &AccountId) -> &[String] {
        self.accounts
            .get(account_id)
            .map(|s| s.processed_events.as_slice())
            .unwrap_or(&[])
    }

    /// Forget every processed relay event id for an account.
    pub fn clear_processed_events(&mut self, account_id: &AccountId) {
        if let Some(state) = self.accounts.get_mut(account_id) {
            state.processed_events.clear();
        }
    }

    // --- Checkpoints ---

    /// Set the protocol-channel EOSE checkpoint.
    pub fn set_last_protocol_eose(&mut self, account_id: &AccountId, timestamp: u64) {
        self.entry(account_id).last_protocol_eose = Some(timestamp);
    }

    /// Protocol-channel EOSE checkpoint (None if never synced).
    pub fn get_last_protocol_eose(&self, account_id: &AccountId) -> Option<u64> {
        self.accounts.get(account_id)?.last_protocol_eose
    }

    /// Set the data-exchange-channel EOSE checkpoint.
    pub fn set_last_data_exchange_eose(&mut self, account_id: &AccountId, timestamp: u64) {
        self.entry(account_id).last_data_exchange_eose = Some(timestamp);
    }

    /// Data-exchange-channel EOSE checkpoint (None if never synced).
    pub fn get_last_data_exchange_eose(&self, account_id: &AccountId) -> Option<u64> {
        self.accounts.get(account_id)?.last_data_exchange_eose
    }

    // --- Trust ---

    /// Trust a device. Returns false if already trusted.
    pub fn add_trusted_device(&mut self, account_id: &AccountId, npub: &str) -> bool {
        let state = self.entry(account_id);
        if state.trusted_devices.iter().any(|d| d == npub) {
            return false;
        }
        state.trusted_devices.push(npub.to_string());
        true
    }

    /// Stop trusting a device. Returns true if it was trusted.
    pub fn remove_trusted_device(&mut self, account_id: &AccountId, npub: &str) -> bool {
        match self.accounts.get_mut(account_id) {
            Some(state) => {
                let before = state.trusted_devices.len();
                state.trusted_devices.retain(|d| d != npub);
                state.trusted_devices.len() != before
            }
            None => false,
        }
    }

    /// Trusted devices in insertion order.
    pub fn get_trusted_devices(&self, account_id: &AccountId) -> &[String] {
        self.accounts
            .get(account_id)
            .map(|s| s.trusted_devices.as_slice())
            .unwrap_or(&[])
    }

    // --- Syncing flag ---

    /// Mark an account's drain as running or finished.
    pub fn set_syncing(&mut self, account_id: &AccountId, syncing: bool) {
        self.entry(account_id).syncing = syncing;
    }

    /// Whether a drain is running (false for unknown accounts).
    pub fn is_syncing(&self, account_id: &AccountId) -> bool {
        self.accounts.get(account_id).is_some_and(|s| s.syncing)
    }

    // --- Mailbox ---

    /// Put a payload in the outbound mailbox (or empty it with `None`).
    pub fn set_transaction_to_share(&mut self, payload: Option<TransactionToShare>) {
        self.transaction_to_share = payload;
    }

    // --- Reset ---

    /// Reset every structure of one account to its empty default.
    ///
    /// Other accounts are untouched.
    pub fn clear_nostr_state(&mut self, account_id: &AccountId) {
        if let Some(state) = self.accounts.get_mut(account_id) {
            *state = AccountSyncState::default();
        }
    }

    pub(crate) fn accounts_mut(&mut self) -> impl Iterator<Item = &mut AccountSyncState> {
        self.accounts.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(id: &str) -> AccountId {
        AccountId::from(id)
    }

    #[test]
    fn unknown_account_reads_defaults() {
        let store = SyncStateStore::new();
        let a = acct("missing");
        assert!(store.get_members(&a).is_empty());
        assert!(store.get_processed_message_ids(&a).is_empty());
        assert!(store.get_processed_events(&a).is_empty());
        assert!(store.get_trusted_devices(&a).is_empty());
        assert_eq!(store.get_last_protocol_eose(&a), None);
        assert_eq!(store.get_last_data_exchange_eose(&a), None);
        assert!(!store.is_syncing(&a));
        assert!(store.account(&a).is_none());
    }

    #[test]
    fn reads_do_not_create_accounts() {
        let store = SyncStateStore::new();
        let _ = store.get_members(&acct("a"));
        assert!(store.account_ids().is_empty());
    }

    #[test]
    fn add_member_is_idempotent_on_npub() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        assert!(store.add_member(&a, "npub1alice", "#112233"));
        assert!(!store.add_member(&a, "npub1alice", "#445566"));
        assert_eq!(store.get_members(&a).len(), 1);
        assert_eq!(store.get_members(&a)[0].color, "#112233");
    }

    #[test]
    fn remove_member() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        store.add_member(&a, "npub1alice", "#112233");
        store.add_member(&a, "npub1bob", "#445566");
        assert!(store.remove_member(&a, "npub1alice"));
        assert!(!store.remove_member(&a, "npub1alice"));
        assert!(!store.remove_member(&acct("other"), "npub1bob"));
        assert_eq!(store.get_members(&a).len(), 1);
        assert!(store.has_member(&a, "npub1bob"));
    }

    #[test]
    fn processed_ids_are_idempotent_and_ordered() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        assert!(store.add_processed_message_id(&a, "m2"));
        assert!(store.add_processed_message_id(&a, "m1"));
        assert!(!store.add_processed_message_id(&a, "m2"));
        assert_eq!(store.get_processed_message_ids(&a), ["m2", "m1"]);
        assert!(store.is_message_processed(&a, "m1"));

        assert!(store.add_processed_event(&a, "ev1"));
        assert!(!store.add_processed_event(&a, "ev1"));
        assert_eq!(store.get_processed_events(&a).len(), 1);
        assert!(store.is_event_processed(&a, "ev1"));
        assert!(!store.is_event_processed(&acct("b"), "ev1"));
    }

    #[test]
    fn clear_processed_sets() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        store.add_processed_message_id(&a, "m1");
        store.add_processed_event(&a, "ev1");
        store.clear_processed_message_ids(&a);
        assert!(store.get_processed_message_ids(&a).is_empty());
        assert_eq!(store.get_processed_events(&a).len(), 1);
        store.clear_processed_events(&a);
        assert!(store.get_processed_events(&a).is_empty());
        // Re-adding after clear works
        assert!(store.add_processed_message_id(&a, "m1"));
    }

    #[test]
    fn checkpoints() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        store.set_last_protocol_eose(&a, 1_700_000_000);
        store.set_last_data_exchange_eose(&a, 1_700_000_500);
        assert_eq!(store.get_last_protocol_eose(&a), Some(1_700_000_000));
        assert_eq!(store.get_last_data_exchange_eose(&a), Some(1_700_000_500));
    }

    #[test]
    fn trusted_devices_dedup_and_order() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        assert!(store.add_trusted_device(&a, "npub1phone"));
        assert!(store.add_trusted_device(&a, "npub1tablet"));
        assert!(!store.add_trusted_device(&a, "npub1phone"));
        assert_eq!(store.get_trusted_devices(&a), ["npub1phone", "npub1tablet"]);
        assert!(store.remove_trusted_device(&a, "npub1phone"));
        assert_eq!(store.get_trusted_devices(&a), ["npub1tablet"]);
    }

    #[test]
    fn syncing_flag() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        store.set_syncing(&a, true);
        assert!(store.is_syncing(&a));
        store.set_syncing(&a, false);
        assert!(!store.is_syncing(&a));
    }

    #[test]
    fn mailbox_overwrite_and_clear() {
        let mut store = SyncStateStore::new();
        store.set_transaction_to_share(Some(TransactionToShare::new("first", "psbt1")));
        store.set_transaction_to_share(Some(TransactionToShare::new("second", "psbt2")));
        assert_eq!(
            store.transaction_to_share.as_ref().map(|t| t.message.as_str()),
            Some("second")
        );
        store.set_transaction_to_share(None);
        assert!(store.transaction_to_share.is_none());
    }

    #[test]
    fn clear_nostr_state_only_touches_one_account() {
        let mut store = SyncStateStore::new();
        let a = acct("a");
        let b = acct("b");
        for id in [&a, &b] {
            store.add_member(id, "npub1alice", "#112233");
            store.add_processed_message_id(id, "m1");
            store.add_processed_event(id, "ev1");
            store.set_last_protocol_eose(id, 10);
            store.set_last_data_exchange_eose(id, 20);
            store.add_trusted_device(id, "npub1phone");
            store.set_syncing(id, true);
        }

        store.clear_nostr_state(&a);

        assert!(store.get_members(&a).is_empty());
        assert!(store.get_processed_message_ids(&a).is_empty());
        assert!(store.get_processed_events(&a).is_empty());
        assert_eq!(store.get_last_protocol_eose(&a), None);
        assert_eq!(store.get_last_data_exchange_eose(&a), None);
        assert!(store.get_trusted_devices(&a).is_empty());
        assert!(!store.is_syncing(&a));

        assert_eq!(store.get_members(&b).len(), 1);
        assert_eq!(store.get_processed_message_ids(&b).len(), 1);
        assert_eq!(store.get_processed_events(&b).len(), 1);
        assert_eq!(store.get_last_protocol_eose(&b), Some(10));
        assert_eq!(store.get_last_data_exchange_eose(&b), Some(20));
        assert_eq!(store.get_trusted_devices(&b).len(), 1);
        assert!(store.is_syncing(&b));
    }

    #[test]
    fn ordered_id_set_remove_keeps_order() {
        let mut set = OrderedIdSet::from(vec!["a".to_string(), "b".into(), "c".into(), "a".into()]);
        assert_eq!(set.len(), 3);
        assert!(set.remove("b"));
        assert_eq!(set.as_slice(), ["a", "c"]);
        assert!(!set.contains("b"));
    }

    #[test]
    fn syncing_flag_is_not_serialized() {
        let mut store = SyncStateStore::new();
        store.set_syncing(&acct("a"), true);
        let json = serde_json::to_value(&store).unwrap();
        assert!(json["accounts"]["a"].get("syncing").is_none());
    }
}
