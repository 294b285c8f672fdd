//! Mock relay for testing.
//!
//! Serves scripted stored events, lets tests push live events and inject
//! failures, and captures everything the orchestrator sends.

use super::{
    LoadingCallback, RelayClient, RelayClientFactory, RelayError, RelayEvent, RelaySubscription,
    SUBSCRIPTION_BUFFER,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use walletsync_types::{AccountConfig, AccountId, Envelope, TransactionToShare};

/// Mock relay client for testing.
///
/// Clones share state, so a test can keep a handle to the client the
/// orchestrator is driving.
#[derive(Default, Clone)]
pub struct MockRelayClient {
    inner: Arc<Mutex<MockRelayInner>>,
}

#[derive(Default)]
struct MockRelayInner {
    connected: bool,
    stored: Vec<Envelope>,
    eose_timestamp: u64,
    withhold_eose: bool,
    connect_delay: Option<Duration>,
    failing_connects: u32,
    connect_error: String,
    refuse_next_connect: bool,
    fail_next_subscribe: Option<String>,
    fail_next_publish: Option<String>,
    connect_calls: usize,
    subscriptions: Vec<Option<u64>>,
    published: Vec<TransactionToShare>,
    flush_calls: usize,
    close_calls: usize,
    live: Vec<mpsc::Sender<RelayEvent>>,
    loading_callback: Option<LoadingCallback>,
}

impl MockRelayClient {
    /// Create a new mock relay client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event the relay will deliver before end-of-stored-events.
    pub fn add_stored(&self, envelope: Envelope) {
        self.inner.lock().unwrap().stored.push(envelope);
    }

    /// Timestamp reported with end-of-stored-events.
    pub fn set_eose_timestamp(&self, timestamp: u64) {
        self.inner.lock().unwrap().eose_timestamp = timestamp;
    }

    /// Keep subscriptions from ever reaching end-of-stored-events.
    pub fn withhold_eose(&self, withhold: bool) {
        self.inner.lock().unwrap().withhold_eose = withhold;
    }

    /// Make every `connect()` take this long.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().connect_delay = Some(delay);
    }

    /// Cause the next `count` connects to fail with the given error.
    pub fn fail_connects(&self, count: u32, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_connects = count;
        inner.connect_error = error.to_string();
    }

    /// Cause the next connect to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.fail_connects(1, error);
    }

    /// Cause the next connect to return `Ok(false)`.
    pub fn refuse_next_connect(&self) {
        self.inner.lock().unwrap().refuse_next_connect = true;
    }

    /// Cause the next subscribe to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_subscribe = Some(error.to_string());
    }

    /// Cause the next publish to fail with the given error.
    pub fn fail_next_publish(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_publish = Some(error.to_string());
    }

    /// Deliver an event on every open subscription.
    ///
    /// Returns false if no subscription is open.
    pub fn push_live(&self, event: RelayEvent) -> bool {
        let senders = self.inner.lock().unwrap().live.clone();
        let mut delivered = false;
        for tx in senders {
            delivered |= tx.try_send(event.clone()).is_ok();
        }
        delivered
    }

    /// Deliver an envelope on the open subscription.
    pub fn push_envelope(&self, envelope: Envelope) -> bool {
        self.push_live(RelayEvent::Envelope(envelope))
    }

    /// Close every open subscription from the relay side.
    pub fn close_from_relay(&self, reason: &str) {
        let senders = std::mem::take(&mut self.inner.lock().unwrap().live);
        for tx in senders {
            let _ = tx.try_send(RelayEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Number of `connect()` calls.
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    /// The `since` argument of every subscribe call, in order.
    pub fn subscriptions(&self) -> Vec<Option<u64>> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    /// Every payload that was published.
    pub fn published(&self) -> Vec<TransactionToShare> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Number of `flush_queue()` calls.
    pub fn flush_calls(&self) -> usize {
        self.inner.lock().unwrap().flush_calls
    }

    /// Number of `close_all_subscriptions()` calls.
    pub fn close_calls(&self) -> usize {
        self.inner.lock().unwrap().close_calls
    }

    /// Whether any subscription is currently open.
    pub fn has_open_subscription(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .live
            .iter()
            .any(|tx| !tx.is_closed())
    }

    /// Whether a loading callback was registered.
    pub fn has_loading_callback(&self) -> bool {
        self.inner.lock().unwrap().loading_callback.is_some()
    }

    fn notify_loading(&self, loading: bool) {
        let callback = self.inner.lock().unwrap().loading_callback.clone();
        if let Some(callback) = callback {
            callback(loading);
        }
    }
}

impl std::fmt::Debug for MockRelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MockRelayClient")
            .field("connected", &inner.connected)
            .field("stored", &inner.stored.len())
            .field("connect_calls", &inner.connect_calls)
            .field("subscriptions", &inner.subscriptions)
            .field("published", &inner.published.len())
            .finish()
    }
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn connect(&self) -> Result<bool, RelayError> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.connect_calls += 1;
            inner.connect_delay
        };
        self.notify_loading(true);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.notify_loading(false);

        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(RelayError::ConnectionFailed(inner.connect_error.clone()));
        }
        if std::mem::take(&mut inner.refuse_next_connect) {
            return Ok(false);
        }

        inner.connected = true;
        Ok(true)
    }

    async fn subscribe_protocol_channel(
        &self,
        since: Option<u64>,
    ) -> Result<RelaySubscription, RelayError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(RelayError::NotConnected);
        }
        inner.subscriptions.push(since);

        // Check for forced failure
        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(RelayError::SubscriptionFailed(error));
        }

        let (tx, subscription) = RelaySubscription::channel(SUBSCRIPTION_BUFFER);
        let since = since.unwrap_or(0);
        for envelope in inner.stored.iter().filter(|e| e.created_at >= since) {
            let _ = tx.try_send(RelayEvent::Envelope(envelope.clone()));
        }
        if !inner.withhold_eose {
            let _ = tx.try_send(RelayEvent::EndOfStoredEvents {
                timestamp: inner.eose_timestamp,
            });
        }
        inner.live.retain(|tx| !tx.is_closed());
        inner.live.push(tx);
        Ok(subscription)
    }

    async fn publish_transaction(&self, share: &TransactionToShare) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(RelayError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_publish.take() {
            return Err(RelayError::PublishFailed(error));
        }

        inner.published.push(share.clone());
        Ok(())
    }

    async fn flush_queue(&self) -> Result<(), RelayError> {
        self.inner.lock().unwrap().flush_calls += 1;
        Ok(())
    }

    async fn close_all_subscriptions(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.close_calls += 1;
        inner.live.clear();
        inner.connected = false;
    }

    fn set_loading_callback(&self, callback: LoadingCallback) {
        self.inner.lock().unwrap().loading_callback = Some(callback);
    }
}

/// Mock factory handing out one [`MockRelayClient`] per account.
#[derive(Debug, Default, Clone)]
pub struct MockRelayFactory {
    inner: Arc<Mutex<MockFactoryInner>>,
}

#[derive(Debug, Default)]
struct MockFactoryInner {
    clients: HashMap<AccountId, MockRelayClient>,
    created: Vec<AccountId>,
    fail_next_create: Option<String>,
}

impl MockRelayFactory {
    /// Create a new mock factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The client that will be (or was) handed out for `account_id`.
    pub fn client(&self, account_id: &AccountId) -> MockRelayClient {
        self.inner
            .lock()
            .unwrap()
            .clients
            .entry(account_id.clone())
            .or_default()
            .clone()
    }

    /// Accounts a client was created for, in call order.
    pub fn created(&self) -> Vec<AccountId> {
        self.inner.lock().unwrap().created.clone()
    }

    /// Cause the next `create()` to fail with the given error.
    pub fn fail_next_create(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_create = Some(error.to_string());
    }
}

#[async_trait]
impl RelayClientFactory for MockRelayFactory {
    async fn create(&self, account: &AccountConfig) -> Result<Arc<dyn RelayClient>, RelayError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_create.take() {
            return Err(RelayError::ConnectionFailed(error));
        }

        inner.created.push(account.id.clone());
        let client = inner.clients.entry(account.id.clone()).or_default().clone();
        Ok(Arc::new(client))
    }
}
