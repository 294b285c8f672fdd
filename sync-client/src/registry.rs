//! Process-wide orchestrator holder.
//!
//! The app composition root owns one [`SyncRegistry`]. It lazily builds the
//! orchestrator on first use and hands out clones of the same instance until
//! [`SyncRegistry::reset_instance`] tears it down.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::orchestrator::SyncOrchestrator;

type Builder = Box<dyn Fn() -> SyncOrchestrator + Send + Sync>;

/// Lazily-built, resettable orchestrator singleton.
pub struct SyncRegistry {
    build: Builder,
    current: Mutex<Option<SyncOrchestrator>>,
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("current", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl SyncRegistry {
    /// Create a registry that builds orchestrators with `build`.
    pub fn new(build: impl Fn() -> SyncOrchestrator + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            current: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SyncOrchestrator>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shared orchestrator, built on first call.
    pub fn get_instance(&self) -> SyncOrchestrator {
        self.lock().get_or_insert_with(|| (self.build)()).clone()
    }

    /// Whether an orchestrator is currently built.
    pub fn has_instance(&self) -> bool {
        self.lock().is_some()
    }

    /// Tear down the current orchestrator, if any.
    ///
    /// Every account is stopped and in-flight work aborted. The next
    /// `get_instance` builds a fresh, independent orchestrator.
    pub fn reset_instance(&self) {
        let discarded = self.lock().take();
        if let Some(orchestrator) = discarded {
            info!("Resetting sync orchestrator");
            orchestrator.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::HashColorGenerator;
    use crate::envelope::MockOpener;
    use crate::orchestrator::OrchestratorConfig;
    use crate::relay::MockRelayFactory;
    use crate::shared::SharedState;
    use crate::storage::MemoryStateStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use walletsync_types::{AccountConfig, SyncStatus};

    fn registry(relays: MockRelayFactory, builds: Arc<AtomicUsize>) -> SyncRegistry {
        SyncRegistry::new(move || {
            builds.fetch_add(1, Ordering::SeqCst);
            SyncOrchestrator::new(
                Arc::new(relays.clone()),
                Arc::new(MockOpener),
                Arc::new(SharedState::new(
                    Arc::new(MemoryStateStorage::new()),
                    Arc::new(HashColorGenerator),
                )),
                OrchestratorConfig::default(),
            )
        })
    }

    #[tokio::test]
    async fn get_instance_returns_same_orchestrator() {
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = registry(MockRelayFactory::new(), builds.clone());
        assert!(!registry.has_instance());

        let a = registry.get_instance();
        let b = registry.get_instance();
        assert!(SyncOrchestrator::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_accounts_and_builds_fresh_instance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let relays = MockRelayFactory::new();
        let registry = registry(relays.clone(), builds.clone());
        let account = AccountConfig::new("a", vec!["wss://relay.example".into()]);

        let first = registry.get_instance();
        let mut status = first.on_status();
        first.start_sync(&account);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(first.has_active_subscription(&account.id));

        registry.reset_instance();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!registry.has_instance());
        assert!(!first.has_active_subscription(&account.id));
        assert_eq!(relays.client(&account.id).close_calls(), 1);

        let mut seen = Vec::new();
        while let Some(event) = status.try_recv() {
            seen.push(event.status);
        }
        assert_eq!(seen.last(), Some(&SyncStatus::Idle));

        let second = registry.get_instance();
        assert!(!SyncOrchestrator::ptr_eq(&first, &second));
        assert_eq!(second.get_active_subscription_count(), 0);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_without_instance_is_noop() {
        let registry = registry(MockRelayFactory::new(), Arc::new(AtomicUsize::new(0)));
        registry.reset_instance();
        assert!(!registry.has_instance());
    }
}
