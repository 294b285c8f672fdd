//! Relay abstraction for wallet sync.
//!
//! The orchestrator never talks to a relay network directly. It asks a
//! [`RelayClientFactory`] for one [`RelayClient`] per account and drives it
//! through a fixed sequence:
//!
//! - `connect()` establishes relay connections
//! - `subscribe_protocol_channel()` opens the protocol-channel subscription,
//!   optionally starting from a checkpoint
//! - `publish_transaction()` / `flush_queue()` send the outbound mailbox
//! - `close_all_subscriptions()` tears everything down
//!
//! # Example
//!
//! ```ignore
//! let client = factory.create(&account).await?;
//! client.connect().await?;
//! let mut sub = client.subscribe_protocol_channel(Some(checkpoint)).await?;
//! while let Some(event) = sub.next().await {
//!     // envelopes, then EndOfStoredEvents, then live envelopes
//! }
//! ```

mod mock;

pub use mock::{MockRelayClient, MockRelayFactory};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use walletsync_types::{AccountConfig, Envelope, TransactionToShare};

/// Default buffer for relay subscription channels.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Could not reach any relay.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation needs a connection first.
    #[error("not connected")]
    NotConnected,

    /// The relay refused or dropped the subscription request.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Publishing an event failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The client was closed.
    #[error("relay client closed")]
    Closed,

    /// Relay did not answer in time.
    #[error("relay timeout")]
    Timeout,
}

/// Something delivered on a protocol-channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// An encrypted event.
    Envelope(Envelope),
    /// All stored events up to `timestamp` (unix seconds) have been delivered.
    EndOfStoredEvents {
        /// Relay time of the end-of-stored-events marker.
        timestamp: u64,
    },
    /// The relay closed the subscription.
    Closed {
        /// Reason reported by the relay.
        reason: String,
    },
}

/// Receiving end of a protocol-channel subscription.
#[derive(Debug)]
pub struct RelaySubscription {
    events: mpsc::Receiver<RelayEvent>,
}

impl RelaySubscription {
    /// Wrap a channel fed by a relay client.
    pub fn new(events: mpsc::Receiver<RelayEvent>) -> Self {
        Self { events }
    }

    /// Create a connected sender/subscription pair.
    pub fn channel(buffer: usize) -> (mpsc::Sender<RelayEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    /// Wait for the next event. `None` once the relay side is gone.
    pub async fn next(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }
}

/// Called by a relay client when its loading state changes.
pub type LoadingCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Per-account relay connection.
///
/// Implementations handle the relay protocol, event signing and
/// encryption of outbound payloads.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Connect to the account's relays.
    ///
    /// `Ok(false)` means the relays were reachable but refused the session.
    async fn connect(&self) -> Result<bool, RelayError>;

    /// Open the protocol-channel subscription.
    ///
    /// With `since`, only events at or after that timestamp are requested.
    async fn subscribe_protocol_channel(
        &self,
        since: Option<u64>,
    ) -> Result<RelaySubscription, RelayError>;

    /// Queue a transaction for sharing with the other members.
    async fn publish_transaction(&self, share: &TransactionToShare) -> Result<(), RelayError>;

    /// Send everything queued for publishing.
    async fn flush_queue(&self) -> Result<(), RelayError>;

    /// Close every open subscription. Idempotent.
    async fn close_all_subscriptions(&self);

    /// Register a loading-state observer.
    fn set_loading_callback(&self, callback: LoadingCallback);
}

/// Builds relay clients for accounts.
#[async_trait]
pub trait RelayClientFactory: Send + Sync {
    /// Create a client for `account`.
    async fn create(&self, account: &AccountConfig) -> Result<Arc<dyn RelayClient>, RelayError>;
}
