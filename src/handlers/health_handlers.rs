//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks MongoDB connectivity

use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, time::Duration};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings MongoDB; 200 with the check list when it answers, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    match tokio::time::timeout(PING_TIMEOUT, state.store.ping()).await {
        Ok(result) => result?,
        Err(_) => return Err(AppError::unavailable("mongo ping timed out")),
    }

    let mut checks = HashMap::new();
    checks.insert("mongo", CheckStatus { ok: true });

    Ok((
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ok".into(),
            checks,
        }),
    ))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::harness;

    #[tokio::test]
    async fn readyz_ok_when_store_answers() {
        let h = harness(vec![]);
        let response = readyz(State(h.state)).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn readyz_unavailable_when_store_stops_answering() {
        let h = harness(vec![]);
        h.store.stop_answering_pings();

        let response = readyz(State(h.state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn app_error_maps_to_its_status() {
        let response = AppError::unavailable("down").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
