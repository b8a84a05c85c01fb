//! Error types surfaced by the HTTP gateway.
//!
//! [`GatewayError`] implements [`IntoResponse`] so handlers can use `?` and
//! still answer with an appropriate status code:
//!
//! - `InvalidRequest` → `400 Bad Request` (malformed or out-of-range `delay`)
//! - `Scheduler(ServiceShutdown | Abandoned)` → `503 Service Unavailable`
//! - `RunFailed` → `500 Internal Server Error`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    /// The client request was malformed or exceeded constraints.
    #[error("Could not find or parse args: {reason}")]
    InvalidRequest { reason: String },

    /// The scheduler refused or dropped the submission.
    #[error(transparent)]
    Scheduler(#[from] runbatch::Error),

    /// The run covering a synchronous request completed unsuccessfully.
    #[error("Run {generation} failed: {reason}")]
    RunFailed { generation: u64, reason: String },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Scheduler(runbatch::Error::ServiceShutdown | runbatch::Error::Abandoned) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::RunFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), format!("{self}\n")).into_response()
    }
}
