//! Error types shared across the sync crates.

use thiserror::Error;

/// Errors that can occur when building or decoding shared types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Account identifiers must be non-empty
    #[error("invalid account id: {0:?}")]
    InvalidAccountId(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// JSON (de)serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),
}
