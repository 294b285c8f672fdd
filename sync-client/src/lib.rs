//! # sync-client
//!
//! Background synchronization of shared wallet state across devices.
//!
//! This is the I/O half of wallet sync: it drives relay clients, timers and
//! persistence around the pure logic in `walletsync-core`.
//!
//! ## Features
//!
//! - **Non-blocking orchestration**: `start_sync` returns immediately; each
//!   account runs on its own task
//! - **Exactly-once processing**: relay events and decrypted messages are
//!   deduplicated against the persisted state store
//! - **Backoff with a ceiling**: transient failures retry with exponential
//!   delay plus jitter, then settle in `error`
//! - **Pluggable boundaries**: relay network, envelope decryption and storage
//!   are traits, with mocks for testing
//!
//! ## Example
//!
//! ```ignore
//! use walletsync_client::{SyncOrchestrator, OrchestratorConfig, SharedState};
//!
//! let state = Arc::new(SharedState::load(storage, colors).await?);
//! let orchestrator = SyncOrchestrator::new(relays, opener, state, OrchestratorConfig::default());
//!
//! orchestrator.set_message_processor(account.id.clone(), processor);
//! orchestrator.start_sync(&account);
//!
//! let mut status = orchestrator.on_status();
//! while let Some(event) = status.recv().await {
//!     println!("{} is {}", event.account_id, event.status);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod color;
pub mod config;
pub mod envelope;
pub mod orchestrator;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod shared;
pub mod storage;

pub use color::{ColorGenerator, HashColorGenerator};
pub use config::{ConfigError, StatusSettings, StorageSettings, SyncSettings};
pub use envelope::{EnvelopeOpener, MockOpener, OpenError};
pub use orchestrator::{
    AttemptError, DrainReport, FetchHandle, MessageProcessor, OrchestratorConfig, ProcessorError,
    SkipReason, StartOutcome, StatusSubscription, SyncOrchestrator,
};
pub use registry::SyncRegistry;
pub use relay::{
    LoadingCallback, MockRelayClient, MockRelayFactory, RelayClient, RelayClientFactory,
    RelayError, RelayEvent, RelaySubscription,
};
pub use retry::{RandomSource, RetryCallback, RetryManager, ScheduleOutcome};
pub use shared::SharedState;
pub use storage::{MemoryStateStorage, SqliteStateStorage, StateStorage, StorageError};
