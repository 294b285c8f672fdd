//! Keyed retry scheduling on Tokio timers.
//!
//! A [`RetryManager`] owns one attempt counter and at most one pending timer
//! per key. Delays come from [`calculate_retry_delay`]; once a key has used up
//! `max_retries` attempts, further schedules are refused until the key is
//! reset.
//!
//! Cancellation is generation-checked: every scheduled timer carries a
//! generation number, and a firing timer only runs its callback if its
//! generation is still the pending one for that key. After `cancel`, `reset`
//! or `reset_all` returns, no previously scheduled callback will start.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use walletsync_core::{calculate_retry_delay, calculate_retry_delay_with, RetryConfig};

/// Callback invoked when a retry timer fires.
pub type RetryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Source of uniform samples in `[0, 1)` used for jitter.
pub type RandomSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Result of [`RetryManager::schedule_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// Whether a timer was armed.
    pub scheduled: bool,
    /// Delay of the armed timer (zero when refused).
    pub delay: Duration,
}

impl ScheduleOutcome {
    fn refused() -> Self {
        Self {
            scheduled: false,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct KeyState {
    attempts: u32,
    pending: Option<PendingTimer>,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner<K> {
    config: RetryConfig,
    random: Option<RandomSource>,
    keys: Mutex<HashMap<K, KeyState>>,
    next_generation: AtomicU64,
}

impl<K> Inner<K> {
    fn keys(&self) -> MutexGuard<'_, HashMap<K, KeyState>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Drop for Inner<K> {
    fn drop(&mut self) {
        let keys = self.keys.get_mut().unwrap_or_else(PoisonError::into_inner);
        for state in keys.values_mut() {
            if let Some(pending) = state.pending.take() {
                pending.handle.abort();
            }
        }
    }
}

/// Per-key exponential backoff with a retry ceiling.
///
/// Cloning is cheap and shares the same counters and timers.
pub struct RetryManager<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for RetryManager<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> std::fmt::Debug for RetryManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("config", &self.inner.config)
            .field("keys", &self.inner.keys().len())
            .finish()
    }
}

impl<K> RetryManager<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a manager using the OS RNG for jitter.
    pub fn new(config: RetryConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a manager with an injected jitter source.
    pub fn with_random(config: RetryConfig, random: RandomSource) -> Self {
        Self::build(config, Some(random))
    }

    fn build(config: RetryConfig, random: Option<RandomSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                random,
                keys: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    /// Delay for the given attempt under this manager's config and jitter source.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.inner.random {
            Some(random) => calculate_retry_delay_with(attempt, &self.inner.config, random()),
            None => calculate_retry_delay(attempt, &self.inner.config),
        }
    }

    /// Arm a retry timer for `key`.
    ///
    /// Refused (nothing armed) once the key has reached `max_retries`.
    /// Otherwise any pending timer for the key is replaced, and when the new
    /// one fires the attempt counter is incremented before `callback` runs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule_retry(&self, key: K, callback: RetryCallback) -> ScheduleOutcome {
        let mut keys = self.inner.keys();
        let state = keys.entry(key.clone()).or_default();

        if state.attempts >= self.inner.config.max_retries {
            return ScheduleOutcome::refused();
        }

        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
        }

        let delay = self.delay_for(state.attempts);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(weak, key, generation, callback);
        });

        state.pending = Some(PendingTimer { generation, handle });
        ScheduleOutcome {
            scheduled: true,
            delay,
        }
    }

    /// Disarm the pending timer for `key`, keeping its attempt count.
    pub fn cancel(&self, key: &K) {
        let mut keys = self.inner.keys();
        if let Some(pending) = keys.get_mut(key).and_then(|s| s.pending.take()) {
            pending.handle.abort();
        }
    }

    /// Cancel and forget `key` entirely.
    pub fn reset(&self, key: &K) {
        let mut keys = self.inner.keys();
        if let Some(mut state) = keys.remove(key) {
            if let Some(pending) = state.pending.take() {
                pending.handle.abort();
            }
        }
    }

    /// Cancel every timer and forget every key.
    pub fn reset_all(&self) {
        let mut keys = self.inner.keys();
        for (_, mut state) in keys.drain() {
            if let Some(pending) = state.pending.take() {
                pending.handle.abort();
            }
        }
    }

    /// Number of retries that have fired for `key` since its last reset.
    pub fn get_attempt_count(&self, key: &K) -> u32 {
        self.inner.keys().get(key).map_or(0, |s| s.attempts)
    }

    /// Whether `key` has used up its retries.
    pub fn is_max_retries_reached(&self, key: &K) -> bool {
        self.get_attempt_count(key) >= self.inner.config.max_retries
    }

    /// Whether a timer is armed for `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner
            .keys()
            .get(key)
            .is_some_and(|s| s.pending.is_some())
    }
}

fn fire<K>(inner: Weak<Inner<K>>, key: K, generation: u64, callback: RetryCallback)
where
    K: Eq + Hash,
{
    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut keys = inner.keys();
        let Some(state) = keys.get_mut(&key) else {
            return;
        };
        match &state.pending {
            Some(pending) if pending.generation == generation => {}
            _ => return,
        }
        state.pending = None;
        state.attempts = state.attempts.saturating_add(1);
    }
    callback();
}
