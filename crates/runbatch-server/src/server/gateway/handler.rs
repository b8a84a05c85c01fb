//! Request handlers for the run gateway.
//!
//! Handlers translate HTTP calls into scheduler submissions. The only thing
//! they validate is the `delay` query parameter; everything about when a run
//! actually happens is up to the scheduler.

use super::error::GatewayError;
use crate::server::telemetry::{
    decrement_waiters_inflight, increment_rejected_requests, increment_submissions,
    increment_waiters_inflight,
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use runbatch::{Outcome, Scheduler, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for every handler.
#[derive(Clone)]
pub struct GatewayState {
    scheduler: Scheduler,
    max_delay: Duration,
    waiters_inflight: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(scheduler: Scheduler, max_delay: Duration) -> Self {
        Self {
            scheduler,
            max_delay,
            waiters_inflight: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    delay: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    scheduler: StatsSnapshot,
    waiters_inflight: u64,
}

/// Tracks a synchronous caller for as long as its handler future is alive,
/// including when the client disconnects and the future is dropped.
struct WaiterGuard<'a> {
    inflight: &'a AtomicU64,
}

impl<'a> WaiterGuard<'a> {
    fn new(inflight: &'a AtomicU64) -> Self {
        inflight.fetch_add(1, Ordering::Relaxed);
        increment_waiters_inflight();
        Self { inflight }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        decrement_waiters_inflight();
    }
}

/// Parses the `delay` parameter as whole, non-negative seconds.
fn parse_delay(raw: Option<&str>, max_delay: Duration) -> Result<Duration, GatewayError> {
    let raw = raw.ok_or_else(|| GatewayError::InvalidRequest {
        reason: "missing `delay`".to_string(),
    })?;

    let secs: u64 = raw.trim().parse().map_err(|_| GatewayError::InvalidRequest {
        reason: format!("`delay` must be a non-negative number of seconds, got {raw:?}"),
    })?;

    let delay = Duration::from_secs(secs);
    if delay > max_delay {
        return Err(GatewayError::InvalidRequest {
            reason: format!(
                "`delay` {secs}s exceeds maximum allowed ({}s)",
                max_delay.as_secs()
            ),
        });
    }
    Ok(delay)
}

fn validated_delay(params: &RunParams, max_delay: Duration) -> Result<Duration, GatewayError> {
    parse_delay(params.delay.as_deref(), max_delay).inspect_err(|_e| {
        increment_rejected_requests();
        #[cfg(feature = "tracing")]
        tracing::debug!("Rejected request: {_e}");
    })
}

/// Queues a run and returns without waiting for it.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(delay = ?params.delay)))]
pub async fn submit_async(
    State(state): State<GatewayState>,
    Query(params): Query<RunParams>,
) -> Result<StatusCode, GatewayError> {
    let delay = validated_delay(&params, state.max_delay)?;
    state.scheduler.submit(delay).await?;
    increment_submissions();
    Ok(StatusCode::ACCEPTED)
}

/// Queues a run and waits until the run covering it has finished.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(delay = ?params.delay)))]
pub async fn submit_sync(
    State(state): State<GatewayState>,
    Query(params): Query<RunParams>,
) -> Result<(StatusCode, String), GatewayError> {
    let delay = validated_delay(&params, state.max_delay)?;
    let completion = state.scheduler.submit_with_completion(delay).await?;
    increment_submissions();

    let _guard = WaiterGuard::new(&state.waiters_inflight);
    let report = completion.await?;

    match report.outcome {
        Outcome::Succeeded => Ok((
            StatusCode::OK,
            format!("run {} completed\n", report.generation),
        )),
        Outcome::Failed { reason } => Err(GatewayError::RunFailed {
            generation: report.generation,
            reason,
        }),
    }
}

pub async fn health(State(state): State<GatewayState>) -> (StatusCode, &'static str) {
    if state.scheduler.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down\n")
    } else {
        (StatusCode::OK, "ok\n")
    }
}

pub async fn stats(State(state): State<GatewayState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        scheduler: state.scheduler.stats(),
        waiters_inflight: state.waiters_inflight.load(Ordering::Relaxed),
    })
}
