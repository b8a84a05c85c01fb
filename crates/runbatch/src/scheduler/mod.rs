//! Run scheduler handle and configuration.
//!
//! [`Scheduler::spawn`] wires the pieces together:
//!
//! ```text
//!   submit() ──► intake (bounded mpsc) ──► control loop ──► generation N queue ──► runner N
//!                                             ▲    │                                  │
//!                       deadline reports ─────┘    └── close marker + token ──────────┘
//!                                                                                     │
//!                                           token released after waiters notified ◄───┘
//! ```
//!
//! The control loop owns the active generation id, the active queue and the
//! capacity token; nothing else touches them, so no locks are involved.

mod control;
#[cfg(test)]
mod tests;

use crate::{
    action::Action,
    error::{Error, Result},
    event::{EventBus, GenerationEvent},
    report::Completion,
    request::RunRequest,
    stats::{Stats, StatsSnapshot},
};
use control::ControlLoop;
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Tuning knobs for a [`Scheduler`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Capacity of the intake buffer between callers and the control loop.
    ///
    /// Submissions only wait when this many requests are already queued, so
    /// it should comfortably exceed the expected burst size.
    pub intake_capacity: usize,

    /// Capacity of the lifecycle event ring buffer. Slow subscribers observe
    /// `RecvError::Lagged` instead of slowing the scheduler down.
    pub event_capacity: usize,

    /// Upper bound on how long [`Scheduler::shutdown`] waits for an execution
    /// that is already in flight.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 100,
            event_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Cloneable handle to a running scheduler.
///
/// All clones feed the same control loop. Dropping every handle without
/// calling [`Scheduler::shutdown`] stops the loop once its intake drains, with
/// the same abandonment semantics as an explicit shutdown.
#[derive(Clone, Debug)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    intake: mpsc::Sender<RunRequest>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    events: EventBus,
    stats: Arc<Stats>,
    shutdown_timeout: Duration,
}

impl Scheduler {
    /// Seeds the capacity token, opens generation 0 and spawns the control
    /// loop onto the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn<A: Action>(action: A, config: SchedulerConfig) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let events = EventBus::new(config.event_capacity);
        let stats = Arc::new(Stats::default());

        let control = ControlLoop::new(
            Arc::new(action),
            intake_rx,
            shutdown_token.clone(),
            tracker.clone(),
            events.clone(),
            Arc::clone(&stats),
        );
        tracker.spawn(control.run());

        Self {
            inner: Arc::new(Inner {
                intake: intake_tx,
                shutdown_token,
                tracker,
                events,
                stats,
                shutdown_timeout: config.shutdown_timeout,
            }),
        }
    }

    /// Submits a request nobody will wait on.
    ///
    /// The request still arms a deadline, so it can close the generation it
    /// joins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub async fn submit(&self, tolerance: Duration) -> Result<()> {
        self.enqueue(RunRequest::detached(tolerance)).await
    }

    /// Submits a request and returns a [`Completion`] that resolves once the
    /// execution covering it has finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub async fn submit_with_completion(&self, tolerance: Duration) -> Result<Completion> {
        let (request, rx) = RunRequest::with_completion(tolerance);
        self.enqueue(request).await?;
        Ok(Completion::new(rx))
    }

    async fn enqueue(&self, request: RunRequest) -> Result<()> {
        if self.inner.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }
        self.inner
            .intake
            .send(request)
            .await
            .map_err(|_| Error::ServiceShutdown)
    }

    /// Subscribes to generation lifecycle events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Gracefully shuts the scheduler down.
    ///
    /// - Stops accepting submissions and cancels every pending deadline.
    /// - Abandons the generation that is still collecting; its waiters resolve
    ///   to [`Error::Abandoned`].
    /// - Waits (up to `shutdown_timeout`) for an execution already holding the
    ///   capacity token to finish and notify its waiters.
    ///
    /// Calling it more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.inner.shutdown_token.cancel();
        self.inner.tracker.close();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Waiting up to {:?} for in-flight runs ({} tasks)",
            self.inner.shutdown_timeout,
            self.inner.tracker.len()
        );
        match timeout(self.inner.shutdown_timeout, self.inner.tracker.wait()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::info!("Scheduler shutdown complete");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful shutdown timed out ({} tasks still active)",
                    self.inner.tracker.len()
                );
            }
        }
        Ok(())
    }
}
