//! # sync-types
//!
//! Shared data model for the wallet synchronization core.
//!
//! This crate provides the foundational types used across all crates:
//! - [`AccountId`] - Identity of a synchronized wallet account
//! - [`AccountConfig`], [`NostrConfig`] - Per-account relay settings (consumed, not owned)
//! - [`Member`], [`TransactionToShare`] - Shared, non-financial account state
//! - [`SyncStatus`], [`StatusEvent`] - Observable subscription lifecycle
//! - [`Envelope`], [`DecryptedMessage`] - What the relay delivers and what a processor sees
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod account;
mod envelope;
mod error;
mod ids;
mod model;
mod status;

pub use account::{AccountConfig, NostrConfig};
pub use envelope::{DecryptedMessage, Envelope};
pub use error::SyncError;
pub use ids::AccountId;
pub use model::{Member, TransactionData, TransactionToShare};
pub use status::{StatusEvent, SyncStatus};
