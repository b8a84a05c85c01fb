//! The scheduler's single control loop.
//!
//! The loop alternates between two phases, both of which keep accepting
//! requests:
//!
//! - **Collecting**: each request is forwarded to the active generation and
//!   arms a deadline for it. Deadline reports for any other generation are
//!   drained and ignored.
//! - **Closing**: entered when the first deadline for the active generation
//!   elapses. Requests are still forwarded (without arming new deadlines)
//!   while the loop waits for the capacity token. Once the token is acquired
//!   it travels to the active runner inside the close marker, and a fresh
//!   generation takes over.
//!
//! Because the token only comes back after the previous runner has finished
//! executing and notified its waiters, the closing generation keeps
//! accumulating requests for as long as the previous execution takes.

use crate::{
    action::Action,
    deadline::deadline_task,
    event::{EventBus, EventKind},
    request::{QueueItem, RunRequest},
    runner::GenerationRunner,
    stats::Stats,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, mpsc},
    time::Instant,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Stand-in deadline for tolerances too large to add to the current instant.
/// Matches the horizon Tokio itself uses for far-future sleeps.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

enum Flow {
    Continue,
    Stop,
}

/// State owned exclusively by the control loop task.
pub(crate) struct ControlLoop<A> {
    action: Arc<A>,
    intake: mpsc::Receiver<RunRequest>,
    deadline_tx: mpsc::UnboundedSender<u64>,
    deadline_rx: mpsc::UnboundedReceiver<u64>,
    capacity: Arc<Semaphore>,
    active_id: u64,
    active_queue: mpsc::UnboundedSender<QueueItem>,
    /// Earliest armed deadline of the active generation, if any.
    earliest_deadline: Option<Instant>,
    pending_deadlines: u64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    events: EventBus,
    stats: Arc<Stats>,
}

impl<A: Action> ControlLoop<A> {
    /// Seeds the capacity token and opens generation 0.
    pub(crate) fn new(
        action: Arc<A>,
        intake: mpsc::Receiver<RunRequest>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
        events: EventBus,
        stats: Arc<Stats>,
    ) -> Self {
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        let active_queue = open_generation(0, &action, &tracker, &events, &stats);

        Self {
            action,
            intake,
            deadline_tx,
            deadline_rx,
            capacity: Arc::new(Semaphore::new(1)),
            active_id: 0,
            active_queue,
            earliest_deadline: None,
            pending_deadlines: 0,
            shutdown,
            tracker,
            events,
            stats,
        }
    }

    pub(crate) async fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Scheduler ready");

        loop {
            // Deadlines are polled before intake so a burst of submissions
            // can never starve the close of the active generation.
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(generation) = self.deadline_rx.recv() => {
                    if !self.drain_deadline(generation) {
                        continue;
                    }
                    if let Flow::Stop = self.close_active().await {
                        break;
                    }
                }
                request = self.intake.recv() => match request {
                    Some(request) => self.accept(request),
                    None => break,
                },
            }
        }

        // Releases any timer still sleeping; the queue of the collecting
        // generation is dropped with `self`, which abandons it.
        self.shutdown.cancel();
        self.stats.set_pending_deadlines(0);

        #[cfg(feature = "tracing")]
        tracing::info!("Scheduler stopped at generation {}", self.active_id);
    }

    /// Routes a request to the collecting generation and arms its deadline.
    ///
    /// A deadline is only armed when it would elapse before every deadline
    /// already armed for this generation; a later one could never be the
    /// first to fire.
    fn accept(&mut self, request: RunRequest) {
        let tolerance = request.tolerance;
        self.forward(request);

        let now = Instant::now();
        let deadline = now
            .checked_add(tolerance)
            .unwrap_or_else(|| now + FAR_FUTURE);
        if self
            .earliest_deadline
            .is_some_and(|earliest| earliest <= deadline)
        {
            return;
        }
        self.earliest_deadline = Some(deadline);

        self.pending_deadlines += 1;
        self.stats.set_pending_deadlines(self.pending_deadlines);
        self.tracker.spawn(deadline_task(
            tolerance,
            self.active_id,
            self.deadline_tx.clone(),
            self.shutdown.clone(),
        ));
    }

    fn forward(&mut self, request: RunRequest) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Request received for run {} (tolerance {:?}, waiting: {})",
            self.active_id,
            request.tolerance,
            request.notify.is_some()
        );
        self.stats.record_accepted();

        // Dropping the request on failure releases its completion sink.
        if self
            .active_queue
            .send(QueueItem::Request(request))
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::error!("Runner for generation {} is gone", self.active_id);
        }
    }

    /// Accounts for one reported deadline. Returns `true` only when it
    /// belongs to the active generation.
    fn drain_deadline(&mut self, generation: u64) -> bool {
        self.pending_deadlines = self.pending_deadlines.saturating_sub(1);
        self.stats.set_pending_deadlines(self.pending_deadlines);

        if generation != self.active_id {
            #[cfg(feature = "tracing")]
            tracing::trace!("Ignoring stale deadline for generation {generation}");
            return false;
        }
        true
    }

    async fn close_active(&mut self) -> Flow {
        #[cfg(feature = "tracing")]
        tracing::info!("Deadline elapsed; waiting to start run {}", self.active_id);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Flow::Stop,
                permit = Arc::clone(&self.capacity).acquire_owned() => {
                    // The semaphore is never closed.
                    let Ok(permit) = permit else {
                        return Flow::Stop;
                    };
                    self.hand_off(permit);
                    return Flow::Continue;
                }
                Some(generation) = self.deadline_rx.recv() => {
                    self.drain_deadline(generation);
                }
                request = self.intake.recv() => match request {
                    Some(request) => self.forward(request),
                    None => return Flow::Stop,
                },
            }
        }
    }

    /// Sends the close marker (with the token) to the active runner and opens
    /// the next generation.
    fn hand_off(&mut self, permit: OwnedSemaphorePermit) {
        if self.active_queue.send(QueueItem::Close(permit)).is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "Runner for generation {} is gone; releasing token",
                self.active_id
            );
        }

        self.active_id += 1;
        self.active_queue = open_generation(
            self.active_id,
            &self.action,
            &self.tracker,
            &self.events,
            &self.stats,
        );
        self.earliest_deadline = None;
    }
}

/// Spawns the runner for `generation` and returns the sender side of its
/// queue.
fn open_generation<A: Action>(
    generation: u64,
    action: &Arc<A>,
    tracker: &TaskTracker,
    events: &EventBus,
    stats: &Arc<Stats>,
) -> mpsc::UnboundedSender<QueueItem> {
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = GenerationRunner::new(
        generation,
        rx,
        Arc::clone(action),
        events.clone(),
        Arc::clone(stats),
    );
    tracker.spawn(runner.run());

    stats.set_active_generation(generation);
    events.publish(generation, EventKind::Opened);

    #[cfg(feature = "tracing")]
    tracing::debug!("Generation {generation} opened");

    tx
}
