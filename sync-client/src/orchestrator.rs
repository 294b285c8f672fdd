//! Background sync orchestration.
//!
//! [`SyncOrchestrator`] keeps one standing protocol-channel subscription per
//! account. Each account has an [`AccountPhase`] from `walletsync-core`; the
//! orchestrator feeds it lifecycle events and performs the returned
//! [`Action`]s (emit status, spawn an attempt, arm or cancel a retry, close
//! the relay client).
//!
//! An attempt runs on its own task:
//!
//! ```text
//! create client -> connect -> subscribe(since = lastProtocolEOSE)
//!   -> drain stored events (dedup, open, process) -> EOSE checkpoint
//!   -> subscribed -> share pending transaction -> consume live events
//! ```
//!
//! Attempts are tagged with a generation number. Outcomes reported by an
//! attempt that has since been stopped or replaced are ignored.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walletsync_core::{AccountPhase, Action, LifecycleEvent, RetryConfig};
use walletsync_types::{AccountConfig, AccountId, DecryptedMessage, Envelope, StatusEvent, SyncStatus};

use crate::config::SyncSettings;
use crate::envelope::EnvelopeOpener;
use crate::relay::{
    LoadingCallback, RelayClient, RelayClientFactory, RelayError, RelayEvent, RelaySubscription,
};
use crate::retry::RetryManager;
use crate::shared::SharedState;

/// Error returned by a message processor.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Application callback for newly seen messages.
///
/// Called at most once per message id per account, unless it fails, in
/// which case the message stays unprocessed and a redelivery retries it.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Handle one decrypted message for `account_id`.
    async fn process(
        &self,
        account_id: &AccountId,
        message: DecryptedMessage,
    ) -> Result<(), ProcessorError>;
}

/// Why `start_sync` or `fetch_once` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The account has auto-sync turned off.
    AutoSyncDisabled,
    /// The account has no relays configured.
    NoRelays,
}

/// What `start_sync` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// An attempt was started.
    Started,
    /// An attempt is already connecting or subscribed.
    AlreadyRunning,
    /// The account's configuration rules out syncing.
    Skipped(SkipReason),
}

/// Why a connection attempt ended without a subscription.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Relay-level failure.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The subscription ended before end-of-stored-events.
    #[error("subscription closed: {0}")]
    Closed(String),

    /// The attempt was stopped.
    #[error("attempt cancelled")]
    Cancelled,
}

/// Counts from draining a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages handed to the processor successfully.
    pub processed: usize,
    /// Events or messages already seen.
    pub duplicates: usize,
    /// Envelopes that could not be opened.
    pub undecryptable: usize,
    /// Messages the processor rejected.
    pub failed: usize,
    /// Messages left alone because no processor was registered.
    pub unhandled: usize,
    /// `created_at` of the oldest failed or unhandled message. The protocol
    /// checkpoint never moves past it, so a resubscribe delivers it again.
    pub earliest_unapplied: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Processed,
    Duplicate,
    Undecryptable,
    Failed,
    Unhandled,
}

impl DrainReport {
    fn record(&mut self, handled: Handled, created_at: u64) {
        match handled {
            Handled::Processed => self.processed += 1,
            Handled::Duplicate => self.duplicates += 1,
            Handled::Undecryptable => self.undecryptable += 1,
            Handled::Failed => self.failed += 1,
            Handled::Unhandled => self.unhandled += 1,
        }
        if matches!(handled, Handled::Failed | Handled::Unhandled) {
            self.earliest_unapplied = Some(
                self.earliest_unapplied
                    .map_or(created_at, |earliest| earliest.min(created_at)),
            );
        }
    }

    /// Checkpoint to store for an EOSE at `eose`, held back to the oldest
    /// unapplied message.
    fn checkpoint_for(&self, eose: u64) -> u64 {
        self.earliest_unapplied.map_or(eose, |earliest| earliest.min(eose))
    }
}

/// Completion handle for a one-shot fetch.
///
/// Dropping it does not cancel the fetch.
#[derive(Debug)]
pub struct FetchHandle {
    rx: oneshot::Receiver<Result<DrainReport, AttemptError>>,
}

impl FetchHandle {
    /// Wait for the fetch to finish.
    pub async fn outcome(self) -> Result<DrainReport, AttemptError> {
        self.rx.await.unwrap_or(Err(AttemptError::Cancelled))
    }
}

/// Receiver of status events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StatusSubscription {
    rx: broadcast::Receiver<StatusEvent>,
}

impl StatusSubscription {
    /// Wait for the next status event. `None` once the orchestrator is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next status event if one is buffered.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status subscriber lagged, oldest events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry backoff.
    pub retry: RetryConfig,
    /// Broadcast buffer for status events.
    pub status_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            status_channel_capacity: 256,
        }
    }
}

impl From<&SyncSettings> for OrchestratorConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            retry: settings.retry,
            status_channel_capacity: settings.status.channel_capacity,
        }
    }
}

struct AccountSlot {
    account: AccountConfig,
    phase: AccountPhase,
    generation: u64,
    task: Option<JoinHandle<()>>,
    client: Option<Arc<dyn RelayClient>>,
}

impl AccountSlot {
    fn new(account: AccountConfig) -> Self {
        Self {
            account,
            phase: AccountPhase::Idle,
            generation: 0,
            task: None,
            client: None,
        }
    }
}

struct Inner {
    relays: Arc<dyn RelayClientFactory>,
    opener: Arc<dyn EnvelopeOpener>,
    state: Arc<SharedState>,
    retry: RetryManager<AccountId>,
    processors: DashMap<AccountId, Arc<dyn MessageProcessor>>,
    slots: DashMap<AccountId, AccountSlot>,
    drain_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    drains: DashMap<AccountId, usize>,
    pulls: DashMap<u64, JoinHandle<()>>,
    status_tx: broadcast::Sender<StatusEvent>,
    next_generation: AtomicU64,
}

/// Drives background sync for many accounts.
///
/// Cloning is cheap; clones share the same accounts, retries and status
/// channel. All methods must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("accounts", &self.inner.slots.len())
            .field("pulls", &self.inner.pulls.len())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        relays: Arc<dyn RelayClientFactory>,
        opener: Arc<dyn EnvelopeOpener>,
        state: Arc<SharedState>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_retry_manager(
            relays,
            opener,
            state,
            RetryManager::new(config.retry),
            config.status_channel_capacity,
        )
    }

    /// Create an orchestrator around an existing retry manager.
    pub fn with_retry_manager(
        relays: Arc<dyn RelayClientFactory>,
        opener: Arc<dyn EnvelopeOpener>,
        state: Arc<SharedState>,
        retry: RetryManager<AccountId>,
        status_channel_capacity: usize,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(status_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                relays,
                opener,
                state,
                retry,
                processors: DashMap::new(),
                slots: DashMap::new(),
                drain_locks: DashMap::new(),
                drains: DashMap::new(),
                pulls: DashMap::new(),
                status_tx,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Whether two handles refer to the same orchestrator.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The state this orchestrator reads and updates.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.inner.state
    }

    /// The retry manager driving automatic reconnects.
    pub fn retry_manager(&self) -> &RetryManager<AccountId> {
        &self.inner.retry
    }

    // ===== Processors =====

    /// Register (or replace) the processor for an account.
    pub fn set_message_processor(&self, account_id: AccountId, processor: Arc<dyn MessageProcessor>) {
        self.inner.processors.insert(account_id, processor);
    }

    /// Remove the processor for an account.
    pub fn remove_message_processor(&self, account_id: &AccountId) {
        self.inner.processors.remove(account_id);
    }

    // ===== Lifecycle =====

    /// Start the standing subscription for `account`.
    ///
    /// Returns immediately; all relay work happens on a background task.
    /// Does nothing if the account cannot sync or is already connecting or
    /// subscribed. From `error`, an explicit start resets the retry count.
    pub fn start_sync(&self, account: &AccountConfig) -> StartOutcome {
        if let Some(reason) = skip_reason(account) {
            debug!(account = %account.id, ?reason, "Sync not started");
            return StartOutcome::Skipped(reason);
        }

        let mut slot = self
            .inner
            .slots
            .entry(account.id.clone())
            .or_insert_with(|| AccountSlot::new(account.clone()));
        if slot.phase.is_running() {
            debug!(account = %account.id, phase = ?slot.phase, "Sync already running");
            return StartOutcome::AlreadyRunning;
        }

        info!(account = %account.id, relays = account.nostr.relays.len(), "Starting sync");
        slot.account = account.clone();
        self.inner
            .apply(&account.id, slot.value_mut(), LifecycleEvent::StartRequested);
        StartOutcome::Started
    }

    /// Stop the standing subscription for an account. Idempotent.
    ///
    /// Closes the relay client, cancels any pending retry, forgets the
    /// account's retry history and emits `idle`.
    pub fn stop_sync(&self, account_id: &AccountId) {
        if let Some((_, mut slot)) = self.inner.slots.remove(account_id) {
            info!(account = %account_id, "Stopping sync");
            self.inner
                .apply(account_id, &mut slot, LifecycleEvent::StopRequested);
        }
        self.inner.retry.reset(account_id);
    }

    /// Stop every tracked account.
    pub fn stop_all(&self) {
        let ids: Vec<AccountId> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_sync(&id);
        }
    }

    /// Stop everything, including in-flight one-shot fetches.
    pub fn shutdown(&self) {
        self.stop_all();
        let pulls: Vec<u64> = self.inner.pulls.iter().map(|e| *e.key()).collect();
        for id in pulls {
            if let Some((_, handle)) = self.inner.pulls.remove(&id) {
                handle.abort();
            }
        }
        self.inner.retry.reset_all();
    }

    /// Run one connect, drain and close cycle for `account`.
    ///
    /// Returns immediately. The pull never counts as an active subscription,
    /// emits no status events and is not retried. `None` if the account's
    /// configuration rules out syncing.
    pub fn fetch_once(&self, account: &AccountConfig) -> Option<FetchHandle> {
        if let Some(reason) = skip_reason(account) {
            debug!(account = %account.id, ?reason, "Fetch not started");
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let pull_id = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let account = account.clone();

        debug!(account = %account.id, "Starting one-shot fetch");
        let handle = tokio::spawn(async move {
            // Wait until the handle is tracked so the removal below always finds it.
            if registered_rx.await.is_err() {
                return;
            }
            let id = account.id.clone();
            let result = Arc::clone(&inner).run_pull(account).await;
            match &result {
                Ok(report) => info!(
                    account = %id,
                    processed = report.processed,
                    duplicates = report.duplicates,
                    "One-shot fetch finished"
                ),
                Err(e) => warn!(account = %id, error = %e, "One-shot fetch failed"),
            }
            inner.pulls.remove(&pull_id);
            let _ = tx.send(result);
        });

        self.inner.pulls.insert(pull_id, handle);
        let _ = registered_tx.send(());
        Some(FetchHandle { rx })
    }

    // ===== Introspection =====

    /// Latest status for an account (`Idle` if unknown).
    pub fn status(&self, account_id: &AccountId) -> SyncStatus {
        self.inner
            .slots
            .get(account_id)
            .map_or(SyncStatus::Idle, |slot| slot.phase.status())
    }

    /// Whether the account has a standing subscription.
    pub fn has_active_subscription(&self, account_id: &AccountId) -> bool {
        self.inner
            .slots
            .get(account_id)
            .is_some_and(|slot| slot.phase.is_subscribed())
    }

    /// Number of standing subscriptions.
    pub fn get_active_subscription_count(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| slot.phase.is_subscribed())
            .count()
    }

    /// Accounts with a standing subscription, sorted.
    pub fn get_active_account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .inner
            .slots
            .iter()
            .filter(|slot| slot.phase.is_subscribed())
            .map(|slot| slot.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Subscribe to status events.
    pub fn on_status(&self) -> StatusSubscription {
        StatusSubscription {
            rx: self.inner.status_tx.subscribe(),
        }
    }
}

fn skip_reason(account: &AccountConfig) -> Option<SkipReason> {
    if account.nostr.sync_enabled() {
        None
    } else if !account.nostr.auto_sync {
        Some(SkipReason::AutoSyncDisabled)
    } else {
        Some(SkipReason::NoRelays)
    }
}

fn loading_logger(account_id: AccountId) -> LoadingCallback {
    Arc::new(move |loading| debug!(account = %account_id, loading, "Relay loading state"))
}

fn close_in_background(client: Arc<dyn RelayClient>) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move { client.close_all_subscriptions().await });
    }
}

/// Marks an account as syncing while at least one drain is running.
///
/// Drains are counted per account; the flag clears when the last guard
/// drops, including on abort.
struct SyncingGuard<'a> {
    inner: &'a Inner,
    account_id: &'a AccountId,
}

impl<'a> SyncingGuard<'a> {
    fn new(inner: &'a Inner, account_id: &'a AccountId) -> Self {
        let mut running = inner.drains.entry(account_id.clone()).or_insert(0);
        *running += 1;
        inner.state.update(|s| s.set_syncing(account_id, true));
        Self { inner, account_id }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut running) = self.inner.drains.get_mut(self.account_id) {
            *running = running.saturating_sub(1);
            if *running == 0 {
                self.inner
                    .state
                    .update(|s| s.set_syncing(self.account_id, false));
            }
        }
    }
}

impl Inner {
    // ===== State machine plumbing =====

    fn apply(self: &Arc<Self>, account_id: &AccountId, slot: &mut AccountSlot, event: LifecycleEvent) {
        let (phase, actions) = slot.phase.on_event(event);
        if phase != slot.phase {
            debug!(account = %account_id, from = ?slot.phase, to = ?phase, ?event, "Lifecycle transition");
        }
        slot.phase = phase;
        for action in actions {
            self.execute(account_id, slot, action);
        }
    }

    fn execute(self: &Arc<Self>, account_id: &AccountId, slot: &mut AccountSlot, action: Action) {
        match action {
            Action::EmitStatus(status) => self.emit(account_id, status),
            Action::SpawnAttempt => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                slot.generation = generation;
                let inner = Arc::clone(self);
                let account = slot.account.clone();
                slot.task = Some(tokio::spawn(inner.run_standing(account, generation)));
            }
            Action::ScheduleRetry => {
                let weak = Arc::downgrade(self);
                let id = account_id.clone();
                let outcome = self.retry.schedule_retry(
                    account_id.clone(),
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_retry_fired(&id);
                        }
                    }),
                );
                let follow_up = if outcome.scheduled {
                    info!(
                        account = %account_id,
                        retry = self.retry.get_attempt_count(account_id) + 1,
                        delay_ms = outcome.delay.as_millis() as u64,
                        "Retry scheduled"
                    );
                    LifecycleEvent::RetryScheduled
                } else {
                    LifecycleEvent::RetryRefused
                };
                self.apply(account_id, slot, follow_up);
            }
            Action::CancelRetry => self.retry.cancel(account_id),
            Action::ResetRetries => self.retry.reset(account_id),
            Action::CloseSubscription => {
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                if let Some(client) = slot.client.take() {
                    close_in_background(client);
                }
            }
            Action::ReportExhausted => error!(
                account = %account_id,
                max_retries = self.retry.config().max_retries,
                "Retries exhausted, giving up until restarted"
            ),
        }
    }

    fn emit(&self, account_id: &AccountId, status: SyncStatus) {
        info!(account = %account_id, %status, "Sync status");
        // No subscribers is fine.
        let _ = self
            .status_tx
            .send(StatusEvent::new(account_id.clone(), status));
    }

    fn on_retry_fired(self: &Arc<Self>, account_id: &AccountId) {
        if let Some(mut slot) = self.slots.get_mut(account_id) {
            info!(account = %account_id, attempt = self.retry.get_attempt_count(account_id), "Retrying sync");
            self.apply(account_id, slot.value_mut(), LifecycleEvent::RetryFired);
        }
    }

    /// Feed an attempt outcome to the state machine. False if the attempt is stale.
    fn report(self: &Arc<Self>, account_id: &AccountId, generation: u64, event: LifecycleEvent) -> bool {
        let Some(mut slot) = self.slots.get_mut(account_id) else {
            return false;
        };
        if slot.generation != generation {
            debug!(account = %account_id, generation, ?event, "Ignoring stale attempt outcome");
            return false;
        }
        self.apply(account_id, slot.value_mut(), event);
        true
    }

    fn attach_client(&self, account_id: &AccountId, generation: u64, client: Arc<dyn RelayClient>) -> bool {
        match self.slots.get_mut(account_id) {
            Some(mut slot) if slot.generation == generation => {
                slot.client = Some(client);
                true
            }
            _ => false,
        }
    }

    // ===== Attempts =====

    async fn run_standing(self: Arc<Self>, account: AccountConfig, generation: u64) {
        let id = account.id.clone();

        let (client, mut subscription) = match self.open(&account, Some(generation)).await {
            Ok(opened) => opened,
            Err(AttemptError::Cancelled) => return,
            Err(e) => {
                warn!(account = %id, error = %e, "Sync attempt failed");
                self.report(&id, generation, LifecycleEvent::AttemptFailed);
                return;
            }
        };

        match self.drain_stored(&account, &mut subscription).await {
            Ok(report) => info!(
                account = %id,
                processed = report.processed,
                duplicates = report.duplicates,
                undecryptable = report.undecryptable,
                failed = report.failed,
                "Stored events drained"
            ),
            Err(e) => {
                warn!(account = %id, error = %e, "Sync attempt failed while draining");
                self.report(&id, generation, LifecycleEvent::AttemptFailed);
                return;
            }
        }

        if !self.report(&id, generation, LifecycleEvent::AttemptSucceeded) {
            client.close_all_subscriptions().await;
            return;
        }

        self.share_pending_transaction(&id, client.as_ref()).await;

        let reason = self.consume_live(&account, &mut subscription).await;
        warn!(account = %id, %reason, "Subscription lost");
        self.report(&id, generation, LifecycleEvent::SubscriptionLost);
    }

    async fn run_pull(self: Arc<Self>, account: AccountConfig) -> Result<DrainReport, AttemptError> {
        let (client, mut subscription) = self.open(&account, None).await?;
        let result = self.drain_stored(&account, &mut subscription).await;
        client.close_all_subscriptions().await;
        result
    }

    /// Create, connect and subscribe. Standing attempts attach the client
    /// to their slot first so a stop can close it mid-connect.
    async fn open(
        &self,
        account: &AccountConfig,
        generation: Option<u64>,
    ) -> Result<(Arc<dyn RelayClient>, RelaySubscription), AttemptError> {
        let client = self.relays.create(account).await?;
        client.set_loading_callback(loading_logger(account.id.clone()));

        if let Some(generation) = generation {
            if !self.attach_client(&account.id, generation, Arc::clone(&client)) {
                client.close_all_subscriptions().await;
                return Err(AttemptError::Cancelled);
            }
        }

        let subscribed = async {
            if !client.connect().await? {
                return Err(RelayError::ConnectionFailed("relay refused connection".into()));
            }
            let since = self.state.read(|s| s.get_last_protocol_eose(&account.id));
            debug!(account = %account.id, ?since, "Subscribing to protocol channel");
            client.subscribe_protocol_channel(since).await
        }
        .await;

        match subscribed {
            Ok(subscription) => Ok((client, subscription)),
            Err(e) => {
                if generation.is_none() {
                    client.close_all_subscriptions().await;
                }
                Err(e.into())
            }
        }
    }

    /// Consume events up to end-of-stored-events.
    async fn drain_stored(
        &self,
        account: &AccountConfig,
        subscription: &mut RelaySubscription,
    ) -> Result<DrainReport, AttemptError> {
        let _syncing = SyncingGuard::new(self, &account.id);
        let mut report = DrainReport::default();
        loop {
            match subscription.next().await {
                Some(RelayEvent::Envelope(envelope)) => {
                    let created_at = envelope.created_at;
                    let handled = self.handle_envelope(account, envelope).await;
                    report.record(handled, created_at);
                }
                Some(RelayEvent::EndOfStoredEvents { timestamp }) => {
                    if report.earliest_unapplied.is_some_and(|earliest| earliest < timestamp) {
                        debug!(
                            account = %account.id,
                            eose = timestamp,
                            held_at = report.checkpoint_for(timestamp),
                            "Holding checkpoint back for unapplied messages"
                        );
                    }
                    self.record_checkpoint(&account.id, report.checkpoint_for(timestamp))
                        .await;
                    return Ok(report);
                }
                Some(RelayEvent::Closed { reason }) => return Err(AttemptError::Closed(reason)),
                None => return Err(AttemptError::Closed("subscription ended".into())),
            }
        }
    }

    /// Consume live events until the subscription goes away.
    async fn consume_live(&self, account: &AccountConfig, subscription: &mut RelaySubscription) -> String {
        let mut live = DrainReport::default();
        loop {
            match subscription.next().await {
                Some(RelayEvent::Envelope(envelope)) => {
                    let created_at = envelope.created_at;
                    let handled = self.handle_envelope(account, envelope).await;
                    live.record(handled, created_at);
                }
                Some(RelayEvent::EndOfStoredEvents { timestamp }) => {
                    self.record_checkpoint(&account.id, live.checkpoint_for(timestamp))
                        .await;
                }
                Some(RelayEvent::Closed { reason }) => return reason,
                None => return "subscription ended".to_string(),
            }
        }
    }

    // ===== Messages =====

    fn drain_lock(&self, account_id: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.drain_locks.entry(account_id.clone()).or_default())
    }

    async fn handle_envelope(&self, account: &AccountConfig, envelope: Envelope) -> Handled {
        let id = &account.id;
        let lock = self.drain_lock(id);
        let _serialized = lock.lock().await;

        if self.state.read(|s| s.is_event_processed(id, &envelope.event_id)) {
            debug!(account = %id, event_id = %envelope.event_id, "Skipping already processed event");
            return Handled::Duplicate;
        }

        let message = match self.opener.open(account, &envelope).await {
            Ok(message) => message,
            Err(e) => {
                warn!(account = %id, event_id = %envelope.event_id, error = %e, "Could not open envelope");
                self.state.update(|s| s.add_processed_event(id, &envelope.event_id));
                self.persist(id).await;
                return Handled::Undecryptable;
            }
        };

        if self.state.read(|s| s.is_message_processed(id, &message.message_id)) {
            debug!(
                account = %id,
                event_id = %envelope.event_id,
                message_id = %message.message_id,
                "Skipping already processed message"
            );
            self.state.update(|s| s.add_processed_event(id, &envelope.event_id));
            self.persist(id).await;
            return Handled::Duplicate;
        }

        let processor = self.processors.get(id).map(|p| Arc::clone(p.value()));
        let Some(processor) = processor else {
            warn!(account = %id, message_id = %message.message_id, "No message processor registered, leaving message unprocessed");
            return Handled::Unhandled;
        };

        let message_id = message.message_id.clone();
        match AssertUnwindSafe(processor.process(id, message)).catch_unwind().await {
            Ok(Ok(())) => {
                self.state.update(|s| {
                    s.add_processed_message_id(id, &message_id);
                    s.add_processed_event(id, &envelope.event_id);
                });
                self.persist(id).await;
                debug!(account = %id, message_id = %message_id, "Message processed");
                Handled::Processed
            }
            Ok(Err(e)) => {
                error!(account = %id, message_id = %message_id, error = %e, "Message processor failed");
                Handled::Failed
            }
            Err(_) => {
                error!(account = %id, message_id = %message_id, "Message processor panicked");
                Handled::Failed
            }
        }
    }

    async fn record_checkpoint(&self, account_id: &AccountId, timestamp: u64) {
        let advanced = self.state.update(|s| {
            if s.get_last_protocol_eose(account_id).is_some_and(|current| current >= timestamp) {
                return false;
            }
            s.set_last_protocol_eose(account_id, timestamp);
            true
        });
        if advanced {
            debug!(account = %account_id, timestamp, "Protocol checkpoint advanced");
            self.persist(account_id).await;
        }
    }

    async fn share_pending_transaction(&self, account_id: &AccountId, client: &dyn RelayClient) {
        let Some(share) = self.state.read(|s| s.transaction_to_share.clone()) else {
            return;
        };

        if let Err(e) = client.publish_transaction(&share).await {
            warn!(account = %account_id, error = %e, "Could not share pending transaction, keeping it queued");
            return;
        }

        let cleared = self.state.update(|s| {
            if s.transaction_to_share.as_ref() == Some(&share) {
                s.set_transaction_to_share(None);
                true
            } else {
                false
            }
        });
        if cleared {
            self.persist(account_id).await;
        }
        info!(account = %account_id, "Shared pending transaction");

        if let Err(e) = client.flush_queue().await {
            warn!(account = %account_id, error = %e, "Could not flush publish queue");
        }
    }

    async fn persist(&self, account_id: &AccountId) {
        if let Err(e) = self.state.persist().await {
            error!(account = %account_id, error = %e, "Could not persist sync state");
        }
    }
}
