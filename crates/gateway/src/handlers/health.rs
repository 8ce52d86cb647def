//! Health check endpoints for load balancers and monitoring.
//!
//! - GET /health - Gateway liveness, counter backend reachability and last
//!   known backend state (no probe)
//! - GET /health/backends - Probe every backend candidate now; 503 if none live

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::{services::CandidateStatus, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/backends", get(probe_backends))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Rate limit counter backend reachable. Requests fail open when it is not.
    rate_limiter: bool,
    /// Issued license keys readable from the key store.
    license_keys: usize,
    live_backends: usize,
    backends: Vec<CandidateStatus>,
}

impl HealthResponse {
    fn new(backends: Vec<CandidateStatus>, rate_limiter: bool, license_keys: usize) -> Self {
        let live_backends = backends.iter().filter(|b| b.live).count();
        Self {
            status: if live_backends > 0 && rate_limiter {
                "ok"
            } else {
                "degraded"
            },
            rate_limiter,
            license_keys,
            live_backends,
            backends,
        }
    }
}

/// The gateway itself is up whenever it can answer.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse::new(
        state.relay.statuses(),
        rate_limiter_ok(&state).await,
        state.stores.keys.load().await.len(),
    ))
}

async fn rate_limiter_ok(state: &AppState) -> bool {
    state
        .stores
        .rate_limiter
        .health_check()
        .await
        .unwrap_or(false)
}

async fn probe_backends(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse::new(
        state.relay.probe().await,
        rate_limiter_ok(&state).await,
        state.stores.keys.load().await.len(),
    );

    let status = if response.live_backends > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
