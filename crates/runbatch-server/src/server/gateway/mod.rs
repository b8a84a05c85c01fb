//! HTTP gateway in front of the run scheduler.
//!
//! ## Routes
//!
//! - `GET|POST /async?delay=<secs>` - submit and return `202 Accepted`
//!   immediately.
//! - `GET|POST /sync?delay=<secs>` - submit and hold the connection open until
//!   the run covering the request has finished.
//! - `GET /health` - `200` while serving, `503` once shutdown has begun.
//! - `GET /stats` - scheduler counters as JSON.

pub mod error;
pub mod handler;

use axum::{Router, routing::get};
use handler::{GatewayState, health, stats, submit_async, submit_sync};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/async", get(submit_async).post(submit_async))
        .route("/sync", get(submit_sync).post(submit_sync))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
