use core::fmt;

/// The expensive, idempotent operation a generation executes once.
///
/// The scheduler never runs two `perform` calls concurrently and imposes no
/// timeout of its own: the returned future runs for as long as the
/// implementation needs. A returned error is reported to every waiter of the
/// generation and to the lifecycle event stream. It is not retried.
///
/// # Example
///
/// ```
/// use runbatch::Action;
///
/// struct Deploy;
///
/// impl Action for Deploy {
///     type Error = std::io::Error;
///
///     async fn perform(&self) -> Result<(), Self::Error> {
///         Ok(())
///     }
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    type Error: fmt::Display + Send;

    fn perform(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Adapter that lets any async closure act as an [`Action`].
///
/// Built with [`action_fn`].
#[derive(Clone)]
pub struct ActionFn<F> {
    f: F,
}

impl<F> fmt::Debug for ActionFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFn").finish_non_exhaustive()
    }
}

/// Wraps `f` so that each execution awaits a fresh future from it.
///
/// ```
/// use runbatch::action_fn;
///
/// let action = action_fn(|| async { Ok::<(), std::io::Error>(()) });
/// # let _ = action;
/// ```
pub fn action_fn<F, Fut, E>(f: F) -> ActionFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + Send,
{
    ActionFn { f }
}

impl<F, Fut, E> Action for ActionFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + Send,
{
    type Error = E;

    fn perform(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (self.f)()
    }
}
