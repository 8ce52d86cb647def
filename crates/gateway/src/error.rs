use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use shared::api::ErrorBody;

use crate::services::RelayFailure;

#[derive(Debug)]
pub enum AppError {
    /// Internal errors - logged but return generic 500 to user
    Internal(anyhow::Error),
    /// User-facing errors - message is safe to show
    External(StatusCode, &'static str),
    /// Validation errors - safe to show
    Validation(String),
    /// A rate limit window was exceeded
    RateLimited {
        message: &'static str,
        retry_after_secs: u64,
    },
    /// The backend relay could not produce a result
    Relay(RelayFailure),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);
                sentry::capture_error(
                    err.as_ref() as &(dyn std::error::Error + Send + Sync + 'static)
                );

                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::External(status, msg) => (status, msg).into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::RateLimited {
                message,
                retry_after_secs,
            } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorBody {
                        error: "rate_limited".to_string(),
                        message: message.to_string(),
                    }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            AppError::Relay(failure) => {
                let (status, kind, message) = match &failure {
                    RelayFailure::Timeout { .. } => (
                        StatusCode::GATEWAY_TIMEOUT,
                        "backend_timeout",
                        "Generation took too long. Try a shorter or simpler request.".to_string(),
                    ),
                    RelayFailure::Unavailable { .. } => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "backend_unavailable",
                        "The image service is starting up. Please try again in a moment."
                            .to_string(),
                    ),
                    RelayFailure::Upstream { status, .. } => (
                        StatusCode::BAD_GATEWAY,
                        "upstream_error",
                        format!(
                            "The image service could not complete the request (status {}).",
                            status.as_u16()
                        ),
                    ),
                };

                (
                    status,
                    Json(ErrorBody {
                        error: kind.to_string(),
                        message,
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use http_body_util::BodyExt;

    async fn response_body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn error_body(response: Response) -> ErrorBody {
        serde_json::from_str(&response_body(response).await).unwrap()
    }

    #[tokio::test]
    async fn internal_error_returns_500_generic_message() {
        let err = AppError::Internal(anyhow::anyhow!("key store write failed"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response_body(response).await, "Internal server error");
    }

    #[tokio::test]
    async fn internal_error_hides_sensitive_details() {
        let err = AppError::Internal(anyhow::anyhow!("master_key=secret123 leaked"));
        let response = err.into_response();

        let body = response_body(response).await;

        assert!(!body.contains("secret123"));
        assert!(!body.contains("master_key"));
    }

    #[tokio::test]
    async fn external_error_returns_specified_status_and_message() {
        let err = AppError::External(StatusCode::FORBIDDEN, "Premium requires a license");
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response_body(response).await, "Premium requires a license");
    }

    #[tokio::test]
    async fn validation_error_returns_400_with_details() {
        let err = AppError::Validation("content: length is lower than 2".into());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_body(response).await, "content: length is lower than 2");
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let err = AppError::RateLimited {
            message: "Too many requests",
            retry_after_secs: 60,
        };
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(error_body(response).await.error, "rate_limited");
    }

    #[tokio::test]
    async fn relay_failures_map_to_distinct_statuses() {
        let timeout = AppError::Relay(RelayFailure::Timeout {
            budget: Duration::from_secs(45),
            tried: vec!["127.0.0.1:5000".into()],
        })
        .into_response();
        let unavailable = AppError::Relay(RelayFailure::Unavailable {
            last_error: "connection refused".into(),
            tried: vec!["127.0.0.1:5000".into()],
        })
        .into_response();
        let upstream = AppError::Relay(RelayFailure::Upstream {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            tried: vec!["127.0.0.1:5000".into()],
        })
        .into_response();

        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);

        assert_eq!(error_body(timeout).await.error, "backend_timeout");
        assert_eq!(error_body(unavailable).await.error, "backend_unavailable");
    }

    #[tokio::test]
    async fn upstream_error_reports_status_without_addresses() {
        let response = AppError::Relay(RelayFailure::Upstream {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            tried: vec!["10.1.2.3:5002".into()],
        })
        .into_response();

        let body = error_body(response).await;
        assert!(body.message.contains("422"));
        assert!(!body.message.contains("10.1.2.3"));
        assert!(!body.message.contains("5002"));
    }

    #[tokio::test]
    async fn io_error_converts_to_internal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disk says no");
        let err: AppError = io_err.into();

        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
