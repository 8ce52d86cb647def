//! Shared API request/response types used by the gateway and its clients.

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Shortest prompt the backend accepts, in characters.
pub const MIN_CONTENT_CHARS: usize = 2;
/// Longest prompt the backend accepts, in characters.
pub const MAX_CONTENT_CHARS: usize = 500;
/// Longest category selector, in characters.
pub const MAX_CATEGORY_CHARS: usize = 100;

/// Separator that turns a category selector into a compound one (e.g. `calm+chaotic`).
pub const COMPOSITION_MARKER: char = '+';

/// Request an image from the compute backend.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GeneratePayload {
    /// Free-form prompt text.
    #[garde(length(chars, min = MIN_CONTENT_CHARS, max = MAX_CONTENT_CHARS))]
    pub content: String,
    /// Vibe/energy selector. Compound selectors join several with `+`.
    #[garde(length(chars, min = 1, max = MAX_CATEGORY_CHARS))]
    pub category: String,
    /// Ask for the elevated tier. Only honoured for entitled callers.
    #[garde(skip)]
    #[serde(default)]
    pub premium: bool,
}

/// Present a license key for redemption.
///
/// Every field is optional: a missing or empty key is a denial, not an error.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RedeemPayload {
    #[serde(default)]
    pub key: Option<String>,
}

/// Outcome of a redemption attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedeemResponse {
    pub granted: bool,
}

/// Current entitlement of the calling session.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitlementStatus {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Start a one-time checkout for a license key.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct CreateCheckoutPayload {
    /// Pre-fills the checkout form; the key is mailed here after payment.
    #[garde(email)]
    #[serde(default)]
    pub email: Option<String>,
}

/// Returned after creating a checkout session.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionResponse {
    pub checkout_url: String,
}

/// Structured error body for failures the caller can act on.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable machine-readable kind, e.g. `backend_timeout`.
    pub error: String,
    /// Human-readable message, safe to display.
    pub message: String,
}
