//! Generation lifecycle events.
//!
//! Every transition a generation goes through is published on a
//! [`tokio::sync::broadcast`] channel. Publishing never blocks and events are
//! dropped when nobody is subscribed, so the stream is purely observational:
//! correctness of the scheduler never depends on it.
//!
//! ```text
//! Opened ──► Closed ──► Executing ──► Done
//!    │
//!    └────► Abandoned   (queue dropped before the close marker arrived)
//! ```

use crate::report::Outcome;
use core::time::Duration;
use tokio::sync::broadcast;

/// A single lifecycle transition of one generation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GenerationEvent {
    pub generation: u64,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum EventKind {
    /// The generation started collecting requests.
    Opened,
    /// The close marker arrived; `waiters` callers are attached.
    Closed { waiters: usize },
    /// The action is running.
    Executing,
    /// The action returned and every waiter has been signaled.
    Done { outcome: Outcome, elapsed: Duration },
    /// The generation was dropped without executing.
    Abandoned { waiters: usize },
}

/// Broadcast sender shared by the scheduler loop and every runner.
#[derive(Clone, Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<GenerationEvent>,
}

impl EventBus {
    /// The minimum capacity is 1 (clamped).
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn publish(&self, generation: u64, kind: EventKind) {
        let _ = self.tx.send(GenerationEvent { generation, kind });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.tx.subscribe()
    }
}
