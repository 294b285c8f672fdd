//! Account configuration consumed by the sync core.
//!
//! The wallet owns these settings; the orchestrator only reads them when
//! deciding whether (and where) to open a subscription.

use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Relay and identity settings for one account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NostrConfig {
    /// Start a standing subscription automatically.
    #[serde(default)]
    pub auto_sync: bool,
    /// Relay URLs. Empty disables sync for the account.
    #[serde(default)]
    pub relays: Vec<String>,
    /// Shared group identity (public part).
    #[serde(default)]
    pub common_npub: String,
    /// Shared group identity (secret part).
    #[serde(default)]
    pub common_nsec: String,
    /// This device's identity (public part).
    #[serde(default)]
    pub device_npub: String,
    /// This device's identity (secret part).
    #[serde(default)]
    pub device_nsec: String,
    /// Devices of other members that this device accepts data from.
    #[serde(default)]
    pub trusted_member_devices: Vec<String>,
}

impl NostrConfig {
    /// Whether the account is configured to sync at all.
    pub fn sync_enabled(&self) -> bool {
        self.auto_sync && !self.relays.is_empty()
    }
}

impl std::fmt::Debug for NostrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NostrConfig")
            .field("auto_sync", &self.auto_sync)
            .field("relays", &self.relays)
            .field("common_npub", &self.common_npub)
            .field("common_nsec", &"[REDACTED]")
            .field("device_npub", &self.device_npub)
            .field("device_nsec", &"[REDACTED]")
            .field("trusted_member_devices", &self.trusted_member_devices)
            .finish()
    }
}

/// The slice of a wallet account the sync core needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identifier.
    pub id: AccountId,
    /// Relay settings.
    pub nostr: NostrConfig,
}

impl AccountConfig {
    /// Create a config with the given relays and auto-sync enabled.
    pub fn new(id: impl Into<AccountId>, relays: Vec<String>) -> Self {
        Self {
            id: id.into(),
            nostr: NostrConfig {
                auto_sync: true,
                relays,
                ..NostrConfig::default()
            },
        }
    }

    /// Set the auto-sync flag.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.nostr.auto_sync = auto_sync;
        self
    }
}
