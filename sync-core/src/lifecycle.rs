//! Per-account subscription lifecycle.
//!
//! This module provides a pure, side-effect-free state machine for one
//! account's standing subscription. It takes events as input and produces a
//! new phase plus a list of actions to execute.
//!
//! The actual I/O (spawning the relay attempt, arming retry timers, emitting
//! status events) is performed by sync-client, not by this module.
//!
//! ```text
//!  Idle ──StartRequested──► Connecting ──AttemptSucceeded──► Subscribed
//!                              │  ▲                              │
//!                AttemptFailed │  │ RetryFired      SubscriptionLost
//!                              ▼  │                              │
//!                             Error ◄────────────────────────────┘
//!
//!  any ──StopRequested──► Idle
//! ```

use walletsync_types::SyncStatus;

/// Lifecycle phase of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountPhase {
    /// No subscription, nothing pending.
    #[default]
    Idle,
    /// An attempt (connect → subscribe → drain) is in flight.
    Connecting,
    /// Standing subscription is live.
    Subscribed,
    /// Last attempt failed.
    Error {
        /// A retry timer is armed for this account.
        retry_pending: bool,
    },
}

impl AccountPhase {
    /// Process an event and return the new phase plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions, in order.
    pub fn on_event(self, event: LifecycleEvent) -> (Self, Vec<Action>) {
        match (self, event) {
            // Explicit start
            (Self::Idle, LifecycleEvent::StartRequested) => (
                Self::Connecting,
                vec![
                    Action::EmitStatus(SyncStatus::Connecting),
                    Action::SpawnAttempt,
                ],
            ),
            // An explicit start after failure restarts the retry count
            (Self::Error { .. }, LifecycleEvent::StartRequested) => (
                Self::Connecting,
                vec![
                    Action::ResetRetries,
                    Action::EmitStatus(SyncStatus::Connecting),
                    Action::SpawnAttempt,
                ],
            ),
            (Self::Connecting, LifecycleEvent::StartRequested)
            | (Self::Subscribed, LifecycleEvent::StartRequested) => (self, vec![]),

            // Attempt outcome
            (Self::Connecting, LifecycleEvent::AttemptSucceeded) => (
                Self::Subscribed,
                vec![
                    Action::ResetRetries,
                    Action::EmitStatus(SyncStatus::Subscribed),
                ],
            ),
            (Self::Connecting, LifecycleEvent::AttemptFailed)
            | (Self::Subscribed, LifecycleEvent::SubscriptionLost) => (
                Self::Error {
                    retry_pending: false,
                },
                vec![
                    Action::CloseSubscription,
                    Action::EmitStatus(SyncStatus::Error),
                    Action::ScheduleRetry,
                ],
            ),

            // Retry bookkeeping
            (Self::Error { .. }, LifecycleEvent::RetryScheduled) => (
                Self::Error {
                    retry_pending: true,
                },
                vec![],
            ),
            (Self::Error { .. }, LifecycleEvent::RetryRefused) => (
                Self::Error {
                    retry_pending: false,
                },
                vec![Action::ReportExhausted],
            ),
            (Self::Error { .. }, LifecycleEvent::RetryFired) => (
                Self::Connecting,
                vec![
                    Action::EmitStatus(SyncStatus::Connecting),
                    Action::SpawnAttempt,
                ],
            ),

            // Stop
            (Self::Idle, LifecycleEvent::StopRequested) => (Self::Idle, vec![Action::CancelRetry]),
            (_, LifecycleEvent::StopRequested) => (
                Self::Idle,
                vec![
                    Action::CancelRetry,
                    Action::CloseSubscription,
                    Action::EmitStatus(SyncStatus::Idle),
                ],
            ),

            // Invalid transitions - stay in current phase
            (phase, _) => (phase, vec![]),
        }
    }

    /// The externally visible status for this phase.
    pub fn status(&self) -> SyncStatus {
        match self {
            Self::Idle => SyncStatus::Idle,
            Self::Connecting => SyncStatus::Connecting,
            Self::Subscribed => SyncStatus::Subscribed,
            Self::Error { .. } => SyncStatus::Error,
        }
    }

    /// An attempt is in flight or the subscription is live.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Connecting | Self::Subscribed)
    }

    /// Check if the standing subscription is live.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

/// Events in an account's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `start_sync` was called (preconditions already checked).
    StartRequested,
    /// Connect, subscribe and initial drain completed.
    AttemptSucceeded,
    /// The attempt failed before the subscription was established.
    AttemptFailed,
    /// A live subscription closed unexpectedly.
    SubscriptionLost,
    /// The retry manager armed a timer.
    RetryScheduled,
    /// The retry manager refused (max retries reached).
    RetryRefused,
    /// The retry timer fired.
    RetryFired,
    /// `stop_sync` was called.
    StopRequested,
}

/// Actions to be executed by the orchestrator.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Emit a status event to observers.
    EmitStatus(SyncStatus),
    /// Start an asynchronous connect → subscribe → drain attempt.
    SpawnAttempt,
    /// Ask the retry manager to arm a timer.
    ScheduleRetry,
    /// Cancel any armed retry timer.
    CancelRetry,
    /// Reset the retry attempt counter.
    ResetRetries,
    /// Tear down the live relay subscription/connection.
    CloseSubscription,
    /// Retries are exhausted; the account stays in error.
    ReportExhausted,
}
