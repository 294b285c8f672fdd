//! Identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SyncError;

/// Identifier of a wallet account whose shared state is synchronized.
///
/// Every per-account structure in the state store and every orchestrator
/// slot is keyed by this value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an AccountId, rejecting empty or whitespace-only input.
    pub fn new(id: impl Into<String>) -> Result<Self, SyncError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SyncError::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}
