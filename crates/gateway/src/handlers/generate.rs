//! Image generation endpoint.
//!
//! - POST /api/generate - Validate, rate limit, then relay to the backend
//!
//! Input is validated before any counter is touched, so malformed requests
//! never consume a caller's window or reach the backend. The backend payload
//! is returned verbatim.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use garde::Validate;
use shared::api::GeneratePayload;

use crate::{
    error::AppError,
    middleware::{identity::ClientIdentity, session::Entitlement},
    models::GenerationRequest,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/generate", post(generate))
}

fn validated(
    payload: Result<Json<GeneratePayload>, JsonRejection>,
) -> Result<GenerationRequest, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let request = GenerationRequest::from(payload);
    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content: must not be blank".to_string()));
    }
    if request.category.is_empty() {
        return Err(AppError::Validation("category: must not be blank".to_string()));
    }

    Ok(request)
}

async fn generate(
    identity: ClientIdentity,
    entitlement: Entitlement,
    State(state): State<AppState>,
    payload: Result<Json<GeneratePayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = validated(payload)?;

    state.limits.check_generation(&identity).await?;

    if request.premium && !entitlement.is_granted() {
        return Err(AppError::External(
            StatusCode::FORBIDDEN,
            "Premium generation requires a license key",
        ));
    }

    let result = state.relay.relay(&request).await.map_err(|failure| {
        tracing::warn!(identity = %identity, tried = ?failure.tried(), "generation failed: {}", failure);
        AppError::Relay(failure)
    })?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::response::Response;
    use http_body_util::BodyExt;
    use shared::api::ErrorBody;

    use super::*;
    use crate::services::{MockBackendRelay, RelayFailure};
    use crate::stores::MockRateLimiter;
    use crate::test_utils::{TestStateBuilder, generation_result, granted_entitlement};

    fn payload(content: &str, category: &str, premium: bool) -> Result<Json<GeneratePayload>, JsonRejection> {
        Ok(Json(GeneratePayload {
            content: content.to_string(),
            category: category.to_string(),
            premium,
        }))
    }

    fn caller() -> ClientIdentity {
        ClientIdentity::new("203.0.113.7")
    }

    async fn body(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn relays_valid_request_and_returns_payload_verbatim() {
        let mut relay = MockBackendRelay::new();
        relay
            .expect_relay()
            .withf(|r| r.content == "a lighthouse at dusk" && r.category == "calm" && !r.is_complex())
            .times(1)
            .returning(|_| Ok(generation_result(r#"{"image":"abc"}"#)));

        let state = TestStateBuilder::new().with_relay(relay).build();

        let response = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("a lighthouse at dusk", " calm ", false),
        )
        .await
        .unwrap()
        .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, Bytes::from_static(br#"{"image":"abc"}"#));
    }

    #[tokio::test]
    async fn invalid_content_is_rejected_before_limiter_and_relay() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_check_simple().never();
        let mut relay = MockBackendRelay::new();
        relay.expect_relay().never();

        let state = TestStateBuilder::new()
            .with_rate_limiter(limiter)
            .with_relay(relay)
            .build();

        for content in ["a".to_string(), "a".repeat(501)] {
            let result = generate(
                caller(),
                Entitlement::default(),
                State(state.clone()),
                payload(&content, "calm", false),
            )
            .await;

            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn blank_category_is_rejected() {
        let mut relay = MockBackendRelay::new();
        relay.expect_relay().never();
        let state = TestStateBuilder::new().with_relay(relay).build();

        let result = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("a sunset", "   ", false),
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn whitespace_only_content_is_rejected() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_check_simple().never();
        let mut relay = MockBackendRelay::new();
        relay.expect_relay().never();
        let state = TestStateBuilder::new()
            .with_rate_limiter(limiter)
            .with_relay(relay)
            .build();

        let result = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("  \t  ", "calm", false),
        )
        .await;

        match result {
            Err(AppError::Validation(message)) => assert!(message.starts_with("content")),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn premium_without_entitlement_is_forbidden() {
        let mut relay = MockBackendRelay::new();
        relay.expect_relay().never();
        let state = TestStateBuilder::new().with_relay(relay).build();

        let result = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("a sunset", "calm", true),
        )
        .await;

        assert!(matches!(result, Err(AppError::External(StatusCode::FORBIDDEN, _))));
    }

    #[tokio::test]
    async fn premium_with_entitlement_is_relayed() {
        let mut relay = MockBackendRelay::new();
        relay
            .expect_relay()
            .withf(|r| r.premium)
            .times(1)
            .returning(|_| Ok(generation_result("{}")));
        let state = TestStateBuilder::new().with_relay(relay).build();

        let result = generate(
            caller(),
            granted_entitlement(),
            State(state),
            payload("a sunset", "calm+chaotic", true),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn eleventh_request_in_a_minute_never_reaches_relay() {
        let mut relay = MockBackendRelay::new();
        relay
            .expect_relay()
            .times(10)
            .returning(|_| Ok(generation_result("{}")));
        let state = TestStateBuilder::new().with_relay(relay).build();

        for _ in 0..10 {
            generate(
                caller(),
                Entitlement::default(),
                State(state.clone()),
                payload("a sunset", "calm", false),
            )
            .await
            .unwrap();
        }

        let response = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("a sunset", "calm", false),
        )
        .await
        .err()
        .unwrap()
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "60");
    }

    #[tokio::test]
    async fn relay_timeout_is_gateway_timeout() {
        let mut relay = MockBackendRelay::new();
        relay.expect_relay().returning(|_| {
            Err(RelayFailure::Timeout {
                budget: Duration::from_secs(45),
                tried: vec!["127.0.0.1:5000".to_string()],
            })
        });
        let state = TestStateBuilder::new().with_relay(relay).build();

        let response = generate(
            caller(),
            Entitlement::default(),
            State(state),
            payload("a sunset", "calm", false),
        )
        .await
        .err()
        .unwrap()
        .into_response();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let error: ErrorBody = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(error.error, "backend_timeout");
    }

    #[tokio::test]
    async fn malformed_json_is_validation_error() {
        use axum::{body::Body, http::Request};
        use tower::ServiceExt;

        let state = TestStateBuilder::new().build();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::post("/generate")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
