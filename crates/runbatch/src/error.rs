//! Error types for the run scheduler.
//!
//! ## Error Cases
//! - `ServiceShutdown`: A request arrived while the scheduler was shutting
//!   down.
//! - `Abandoned`: The generation a caller was waiting on was dropped before it
//!   could execute (shutdown, or its runner went away).

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the run scheduler.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The scheduler is in the process of shutting down.
    #[error("Scheduler is shutting down")]
    ServiceShutdown,

    /// The covering generation was released without ever executing.
    #[error("Run abandoned before execution")]
    Abandoned,
}
