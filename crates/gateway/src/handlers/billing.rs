//! Stripe billing endpoints for one-time license purchases.
//!
//! ## Endpoints
//!
//! - POST /billing/checkout - Create a Stripe Checkout session for a license key
//! - POST /billing/webhook - Handle Stripe webhook events; issues keys on payment

use axum::{
    Json, Router,
    body::Bytes,
    debug_handler,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use garde::Validate;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared::api::{CreateCheckoutPayload, CreateCheckoutSessionResponse};
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
};

use crate::{
    error::AppError,
    middleware::identity::ClientIdentity,
    models::UNKNOWN_OWNER,
    services::LimitScope,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/webhook", post(handle_webhook))
}

/// Maximum age of webhook events (5 minutes) to prevent replay attacks.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Verify Stripe webhook signature using HMAC-SHA256.
/// Signature header format: t=<timestamp>,v1=<sig1>,v1=<sig2>,...
fn verify_stripe_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<(), &'static str> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in signature_header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or("Invalid signature header format")?;

        match key {
            "t" => timestamp = Some(value),
            "v1" => signatures.push(value),
            _ => {} // v0 and future schemes
        }
    }

    let timestamp_str = timestamp.ok_or("Missing timestamp in signature")?;
    if signatures.is_empty() {
        return Err("Missing signature in header");
    }

    let timestamp_secs: i64 = timestamp_str.parse().map_err(|_| "Invalid timestamp")?;
    if (now - timestamp_secs).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err("Timestamp outside tolerance window");
    }

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "Invalid webhook secret")?;
    mac.update(timestamp_str.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err("Signature mismatch")
    }
}

/// Create a one-time payment Checkout session for a license key.
#[debug_handler(state = AppState)]
async fn create_checkout(
    identity: ClientIdentity,
    State(state): State<AppState>,
    payload: Result<Json<CreateCheckoutPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateCheckoutPayload::default(),
        Err(e) => return Err(AppError::Validation(e.body_text())),
    };

    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state.limits.check(&identity, LimitScope::General).await?;

    let checkout_session = CheckoutSession::create(
        &state.stripe,
        CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(state.config.stripe_price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            customer_email: payload.email.as_deref(),
            success_url: Some(state.config.checkout_success_url.as_str()),
            cancel_url: Some(state.config.checkout_cancel_url.as_str()),
            ..Default::default()
        },
    )
    .await?;

    let checkout_url = checkout_session
        .url
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Checkout session missing URL")))?;

    tracing::info!(
        session_id = %checkout_session.id,
        identity = %identity,
        "checkout session created"
    );

    Ok(Json(CreateCheckoutSessionResponse { checkout_url }))
}

/// Handle Stripe webhook events.
/// We parse events manually to be resilient to Stripe API version changes.
#[debug_handler]
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature_header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::External(StatusCode::BAD_REQUEST, "Missing stripe-signature header")
        })?;

    let payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::External(StatusCode::BAD_REQUEST, "Invalid payload encoding"))?;

    verify_stripe_signature(
        payload,
        signature_header,
        &state.config.stripe_webhook_secret,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!("Webhook signature verification failed: {}", e);
        AppError::External(StatusCode::BAD_REQUEST, "Invalid webhook signature")
    })?;

    // Parse just the fields we need
    let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
        tracing::warn!("Failed to parse webhook event: {}", e);
        AppError::External(StatusCode::BAD_REQUEST, "Invalid event payload")
    })?;

    tracing::info!(event_type = %event.event_type, event_id = %event.id, "webhook received");

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            match event.data.as_checkout_session() {
                Some(session) if session.is_unpaid() => {
                    tracing::info!(session_id = %session.id, "checkout completed but payment pending");
                }
                Some(session) => handle_payment_completed(&state, session).await?,
                None => {
                    tracing::warn!(event_id = %event.id, "checkout event without session object");
                }
            }
        }
        _ => {
            tracing::debug!(event_type = %event.event_type, "ignoring unhandled event type");
        }
    }

    Ok(StatusCode::OK)
}

/// Minimal webhook event structure for lenient parsing.
#[derive(Debug, serde::Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, serde::Deserialize)]
struct WebhookEventData {
    object: serde_json::Value,
}

impl WebhookEventData {
    fn as_checkout_session(&self) -> Option<CheckoutSessionData> {
        serde_json::from_value::<CheckoutSessionData>(self.object.clone())
            .ok()
            .filter(|s| s.object == "checkout.session")
    }
}

#[derive(Debug, serde::Deserialize)]
struct CheckoutSessionData {
    object: String,
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
}

#[derive(Debug, serde::Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

impl CheckoutSessionData {
    fn is_unpaid(&self) -> bool {
        self.payment_status.as_deref() == Some("unpaid")
    }

    /// Buyer email: customer details first, then the prefilled email.
    fn owner(&self) -> &str {
        fn usable(email: Option<&str>) -> Option<&str> {
            email.map(str::trim).filter(|e| !e.is_empty())
        }

        usable(self.customer_details.as_ref().and_then(|d| d.email.as_deref()))
            .or_else(|| usable(self.customer_email.as_deref()))
            .unwrap_or(UNKNOWN_OWNER)
    }
}

/// Issue a license key for a paid session and mail it to the buyer.
async fn handle_payment_completed(
    state: &AppState,
    session: CheckoutSessionData,
) -> Result<(), AppError> {
    // Persistence failure propagates so Stripe redelivers the event
    let record = state.issuer.issue(session.owner()).await?;

    tracing::info!(session_id = %session.id, owner = %record.owner, "license key issued for payment");

    if !record.has_deliverable_owner() {
        tracing::warn!(session_id = %session.id, "paid session without customer email, key not delivered");
        return Ok(());
    }

    if let Err(e) = state.email.send_license_key(&record.owner, &record.key).await {
        tracing::error!(owner = %record.owner, "failed to email license key: {:#}", e);
    }

    Ok(())
}
