use portable_atomic::{AtomicU64, Ordering};

/// Counters shared between the scheduler loop, its runners, and the handle.
///
/// Writers are the scheduler loop and whichever runner currently holds the
/// capacity token. Reads are relaxed: a snapshot is a best-effort view, not a
/// consistent cut.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    active_generation: AtomicU64,
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    pending_deadlines: AtomicU64,
}

impl Stats {
    pub(crate) fn set_active_generation(&self, generation: u64) {
        self.active_generation.store(generation, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_pending_deadlines(&self, pending: u64) {
        self.pending_deadlines.store(pending, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_generation: self.active_generation.load(Ordering::Relaxed),
            accepted_requests: self.accepted.load(Ordering::Relaxed),
            completed_executions: self.completed.load(Ordering::Relaxed),
            failed_executions: self.failed.load(Ordering::Relaxed),
            pending_deadlines: self.pending_deadlines.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatsSnapshot {
    /// Id of the generation currently collecting requests.
    pub active_generation: u64,
    /// Requests the scheduler loop has routed to a generation.
    pub accepted_requests: u64,
    /// Executions whose action returned (successfully or not).
    pub completed_executions: u64,
    /// Subset of `completed_executions` whose action failed.
    pub failed_executions: u64,
    /// Deadline tasks spawned but not yet drained by the scheduler loop.
    pub pending_deadlines: u64,
}
