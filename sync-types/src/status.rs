//! Observable subscription status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AccountId;

/// Subscription status of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No subscription and no attempt in flight.
    #[default]
    Idle,
    /// An attempt is running (connect, subscribe, drain).
    Connecting,
    /// Stored events drained; standing subscription live.
    Subscribed,
    /// Last attempt failed. A retry may be pending.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Subscribed => "subscribed",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A status transition delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Account the transition belongs to.
    pub account_id: AccountId,
    /// New status.
    pub status: SyncStatus,
}

impl StatusEvent {
    /// Create a status event.
    pub fn new(account_id: AccountId, status: SyncStatus) -> Self {
        Self { account_id, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_wire_name() {
        for status in [
            SyncStatus::Idle,
            SyncStatus::Connecting,
            SyncStatus::Subscribed,
            SyncStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }

    #[test]
    fn default_status_is_idle() {
        assert_eq!(SyncStatus::default(), SyncStatus::Idle);
    }
}
