use crate::report::RunReport;
use core::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, oneshot};

/// A single submission waiting to be covered by an execution.
///
/// - `tolerance`: How long the caller is willing to wait before the batch it
///   joined should close.
/// - `notify`: Completion sink for synchronous callers. Fired exactly once by
///   the runner that owns the request.
#[derive(Debug)]
pub struct RunRequest {
    pub tolerance: Duration,
    pub notify: Option<oneshot::Sender<RunReport>>,
}

impl RunRequest {
    /// A request nobody waits on.
    pub const fn detached(tolerance: Duration) -> Self {
        Self {
            tolerance,
            notify: None,
        }
    }

    /// A request paired with the receiving half of its completion sink.
    pub fn with_completion(tolerance: Duration) -> (Self, oneshot::Receiver<RunReport>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tolerance,
                notify: Some(tx),
            },
            rx,
        )
    }
}

/// An element of a generation's queue.
///
/// The scheduler sends [`QueueItem::Request`]s while the generation is
/// collecting, then exactly one [`QueueItem::Close`]. The close marker carries
/// the capacity token; the runner releases it only after every waiter has been
/// signaled, which is what lets the next generation close.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Request(RunRequest),
    Close(OwnedSemaphorePermit),
}
