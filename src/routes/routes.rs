//! HTTP routes of the optional health server.
//!
//! - `GET /healthz`: liveness
//! - `GET /readyz`: readiness (MongoDB ping)

use crate::{
    handlers::health_handlers::{healthz, readyz},
    state::AppState,
};
use axum::{Router, routing::get};

/// Build the health router. The router carries the shared [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
