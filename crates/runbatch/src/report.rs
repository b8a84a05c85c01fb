use crate::error::{Error, Result};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use pin_project_lite::pin_project;
use tokio::sync::oneshot;

/// How a single execution of the action ended.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
}

impl Outcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// What a waiter learns once the execution covering its request finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunReport {
    pub generation: u64,
    pub outcome: Outcome,
}

pin_project! {
    /// Handle returned to callers that asked to be told when their request has
    /// been covered by a completed execution.
    ///
    /// Resolves exactly once. If the generation the request joined is released
    /// without running (e.g. the scheduler shut down while it was still
    /// collecting), the future resolves to [`Error::Abandoned`] instead of
    /// hanging.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    #[derive(Debug)]
    pub struct Completion {
        #[pin]
        rx: oneshot::Receiver<RunReport>,
    }
}

impl Completion {
    pub(crate) const fn new(rx: oneshot::Receiver<RunReport>) -> Self {
        Self { rx }
    }
}

impl Future for Completion {
    type Output = Result<RunReport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .rx
            .poll(cx)
            .map(|res| res.map_err(|_| Error::Abandoned))
    }
}
