//! License key redemption and session entitlement.
//!
//! ## Endpoints
//!
//! - POST /api/license/redeem - Verify a key; on success set the entitlement cookie
//! - GET /api/license/status - Report the calling session's entitlement
//!
//! Redemption never errors on bad input: a missing, malformed or unknown key
//! is `{"granted": false}`.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::SignedCookieJar;
use shared::api::{EntitlementStatus, RedeemPayload, RedeemResponse};

use crate::{
    error::AppError,
    middleware::{
        identity::ClientIdentity,
        session::{Entitlement, entitlement_cookie},
    },
    services::{LimitScope, Verdict},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/redeem", post(redeem))
        .route("/status", get(status))
}

async fn redeem(
    identity: ClientIdentity,
    State(state): State<AppState>,
    jar: SignedCookieJar,
    payload: Result<Json<RedeemPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.limits.check(&identity, LimitScope::General).await?;

    let key = payload
        .ok()
        .and_then(|Json(payload)| payload.key)
        .unwrap_or_default();

    match state.verifier.verify(&key).await {
        Verdict::Granted(token) => {
            let cookie = entitlement_cookie(&token, state.config.is_production())?;
            Ok((jar.add(cookie), Json(RedeemResponse { granted: true })))
        }
        Verdict::Denied => {
            tracing::info!(identity = %identity, "redemption denied");
            Ok((jar, Json(RedeemResponse { granted: false })))
        }
    }
}

async fn status(
    identity: ClientIdentity,
    entitlement: Entitlement,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.limits.check(&identity, LimitScope::General).await?;

    let granted = entitlement.is_granted();
    let expires_at = entitlement
        .0
        .filter(|_| granted)
        .map(|token| token.expires_at);

    Ok(Json(EntitlementStatus {
        granted,
        expires_at,
    }))
}
