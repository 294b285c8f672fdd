//! Persisted snapshot format and schema validation.
//!
//! The whole [`SyncStateStore`] is persisted as a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "accounts": {
//!     "<account id>": {
//!       "members": [{ "npub": "...", "color": "#rrggbb" }],
//!       "processedMessageIds": ["..."],
//!       "processedEvents": ["..."],
//!       "lastProtocolEOSE": 1700000000,
//!       "lastDataExchangeEOSE": null,
//!       "trustedDevices": ["npub..."]
//!     }
//!   },
//!   "transactionToShare": null
//! }
//! ```
//!
//! Restored payloads (app start, backup import) are checked against this
//! schema *before* anything is deserialized into the store, so a malformed
//! backup is rejected with the path of the first offending field instead of
//! partially applied.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::SyncStateStore;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u64 = 1;

/// A schema violation at a JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {reason}")]
pub struct ValidationError {
    /// Dotted path to the offending field (e.g. `accounts.a.members[2].npub`).
    pub path: String,
    /// What was wrong.
    pub reason: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors restoring or producing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Not JSON, or JSON that does not match the types after validation.
    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed schema validation.
    #[error("snapshot failed validation: {0}")]
    Invalid(#[from] ValidationError),

    /// Written by a newer (or unknown) schema.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u64),
}

impl SyncStateStore {
    /// Produce the persisted JSON form. Volatile fields are omitted.
    pub fn to_snapshot(&self) -> Result<Value, SnapshotError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            map.insert("version".into(), Value::from(SNAPSHOT_VERSION));
        }
        Ok(value)
    }

    /// Produce the persisted form as a JSON string.
    pub fn to_snapshot_string(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(&self.to_snapshot()?)?)
    }

    /// Validate and load a snapshot.
    ///
    /// Duplicate ids, members and trusted devices are collapsed (first wins).
    pub fn from_snapshot(value: &Value) -> Result<Self, SnapshotError> {
        validate_snapshot(value)?;
        let mut store: SyncStateStore = serde_json::from_value(value.clone())?;
        for account in store.accounts_mut() {
            account.normalize();
        }
        Ok(store)
    }

    /// Validate and load a snapshot from a JSON string.
    pub fn from_snapshot_str(json: &str) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_snapshot(&value)
    }
}

/// Check a snapshot against the schema without loading it.
pub fn validate_snapshot(value: &Value) -> Result<(), SnapshotError> {
    let root = as_object(value, "$")?;

    let version = root
        .get("version")
        .ok_or_else(|| ValidationError::new("version", "required field missing"))?
        .as_u64()
        .ok_or_else(|| ValidationError::new("version", "expected non-negative integer"))?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let accounts = root
        .get("accounts")
        .ok_or_else(|| ValidationError::new("accounts", "required field missing"))?;
    for (id, account) in as_object(accounts, "accounts")? {
        if id.trim().is_empty() {
            return Err(ValidationError::new("accounts", "account id must not be empty").into());
        }
        validate_account(account, &format!("accounts.{}", id))?;
    }

    match root.get("transactionToShare") {
        None | Some(Value::Null) => {}
        Some(share) => validate_share(share, "transactionToShare")?,
    }

    Ok(())
}

fn validate_account(value: &Value, path: &str) -> Result<(), ValidationError> {
    let account = as_object(value, path)?;

    if let Some(members) = account.get("members") {
        let members_path = format!("{}.members", path);
        for (i, member) in as_array(members, &members_path)?.iter().enumerate() {
            let member_path = format!("{}[{}]", members_path, i);
            let member = as_object(member, &member_path)?;
            required_string(member, "npub", &member_path)?;
            required_string(member, "color", &member_path)?;
        }
    }

    for field in ["processedMessageIds", "processedEvents", "trustedDevices"] {
        if let Some(list) = account.get(field) {
            string_array(list, &format!("{}.{}", path, field))?;
        }
    }

    for field in ["lastProtocolEOSE", "lastDataExchangeEOSE"] {
        match account.get(field) {
            None | Some(Value::Null) => {}
            Some(ts) if ts.as_u64().is_some() => {}
            Some(_) => {
                return Err(ValidationError::new(
                    format!("{}.{}", path, field),
                    "expected null or non-negative integer timestamp",
                ))
            }
        }
    }

    Ok(())
}

fn validate_share(value: &Value, path: &str) -> Result<(), ValidationError> {
    let share = as_object(value, path)?;
    required_string(share, "message", path)?;
    let data_path = format!("{}.transactionData", path);
    let data = share
        .get("transactionData")
        .ok_or_else(|| ValidationError::new(&data_path, "required field missing"))?;
    required_string(as_object(data, &data_path)?, "combinedPsbt", &data_path)?;
    Ok(())
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::new(path, "expected object"))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ValidationError> {
    value
        .as_array()
        .ok_or_else(|| ValidationError::new(path, "expected array"))
}

fn string_array(value: &Value, path: &str) -> Result<(), ValidationError> {
    for (i, item) in as_array(value, path)?.iter().enumerate() {
        if !item.is_string() {
            return Err(ValidationError::new(
                format!("{}[{}]", path, i),
                "expected string",
            ));
        }
    }
    Ok(())
}

fn required_string(
    object: &Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<(), ValidationError> {
    let field_path = format!("{}.{}", path, field);
    match object.get(field) {
        None => Err(ValidationError::new(field_path, "required field missing")),
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ValidationError::new(field_path, "expected string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use walletsync_types::{AccountId, TransactionToShare};

    fn populated_store() -> SyncStateStore {
        let mut store = SyncStateStore::new();
        let a = AccountId::from("vault");
        store.add_member(&a, "npub1alice", "#a1b2c3");
        store.add_processed_message_id(&a, "m1");
        store.add_processed_event(&a, "ev1");
        store.set_last_protocol_eose(&a, 1_700_000_000);
        store.add_trusted_device(&a, "npub1phone");
        store.set_syncing(&a, true);
        store.set_transaction_to_share(Some(TransactionToShare::new("sign me", "cHNidP8B")));
        store
    }

    #[test]
    fn snapshot_has_documented_shape() {
        let snapshot = populated_store().to_snapshot().unwrap();
        assert_eq!(snapshot["version"], 1);
        let account = &snapshot["accounts"]["vault"];
        assert_eq!(account["members"][0]["npub"], "npub1alice");
        assert_eq!(account["processedMessageIds"], json!(["m1"]));
        assert_eq!(account["lastProtocolEOSE"], 1_700_000_000u64);
        assert!(account["lastDataExchangeEOSE"].is_null());
        assert_eq!(
            snapshot["transactionToShare"]["transactionData"]["combinedPsbt"],
            "cHNidP8B"
        );
    }

    #[test]
    fn restore_drops_volatile_flag() {
        let store = populated_store();
        let restored = SyncStateStore::from_snapshot(&store.to_snapshot().unwrap()).unwrap();
        let a = AccountId::from("vault");
        assert!(!restored.is_syncing(&a));
        assert_eq!(restored.get_members(&a), store.get_members(&a));
        assert_eq!(restored.transaction_to_share, store.transaction_to_share);
    }

    #[test]
    fn missing_version_is_rejected() {
        let err = SyncStateStore::from_snapshot(&json!({ "accounts": {} })).unwrap_err();
        match err {
            SnapshotError::Invalid(v) => assert_eq!(v.path, "version"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn future_version_is_refused() {
        let err = SyncStateStore::from_snapshot(&json!({ "version": 2, "accounts": {} }))
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(2)));
    }

    #[test]
    fn member_shape_is_checked() {
        let err = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": { "a": { "members": [{ "npub": "npub1x", "color": "#000000" }, { "npub": 7 }] } }
        }))
        .unwrap_err();
        match err {
            SnapshotError::Invalid(v) => {
                assert_eq!(v.path, "accounts.a.members[1].npub");
                assert_eq!(v.reason, "expected string");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn id_lists_must_hold_strings() {
        let err = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": { "a": { "processedEvents": ["ok", null] } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("accounts.a.processedEvents[1]"));
    }

    #[test]
    fn checkpoint_must_be_timestamp() {
        let err = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": { "a": { "lastProtocolEOSE": "yesterday" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("lastProtocolEOSE"));
    }

    #[test]
    fn share_requires_psbt() {
        let err = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": {},
            "transactionToShare": { "message": "hi", "transactionData": {} }
        }))
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("transactionToShare.transactionData.combinedPsbt"));
    }

    #[test]
    fn optional_account_fields_default() {
        let store = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": { "a": {} }
        }))
        .unwrap();
        assert!(store.get_members(&AccountId::from("a")).is_empty());
        assert!(store.account(&AccountId::from("a")).is_some());
    }

    #[test]
    fn duplicates_collapse_on_restore() {
        let store = SyncStateStore::from_snapshot(&json!({
            "version": 1,
            "accounts": { "a": {
                "members": [
                    { "npub": "npub1x", "color": "#000001" },
                    { "npub": "npub1x", "color": "#000002" }
                ],
                "processedMessageIds": ["m1", "m1", "m2"],
                "trustedDevices": ["d", "d"]
            } }
        }))
        .unwrap();
        let a = AccountId::from("a");
        assert_eq!(store.get_members(&a).len(), 1);
        assert_eq!(store.get_members(&a)[0].color, "#000001");
        assert_eq!(store.get_processed_message_ids(&a), ["m1", "m2"]);
        assert_eq!(store.get_trusted_devices(&a), ["d"]);
    }

    #[test]
    fn not_json_is_a_json_error() {
        let err = SyncStateStore::from_snapshot_str("{not json").unwrap_err();
        assert!(matches!(err, SnapshotError::Json(_)));
    }
}
