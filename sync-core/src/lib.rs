//! # sync-core
//!
//! Pure logic for wallet sync (no I/O, instant tests).
//!
//! This crate implements the algorithms and bookkeeping for multi-device
//! synchronization without any network, timer or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relays, timers, persistence) is performed by `sync-client`,
//! which interprets the actions produced by the lifecycle state machine and
//! drives the [`SyncStateStore`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod lifecycle;
pub mod snapshot;
pub mod store;

pub use backoff::{calculate_retry_delay, calculate_retry_delay_with, RetryConfig, RetryConfigError};
pub use lifecycle::{AccountPhase, Action, LifecycleEvent};
pub use snapshot::{SnapshotError, ValidationError, SNAPSHOT_VERSION};
pub use store::{AccountSyncState, OrderedIdSet, SyncStateStore};
