use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::api::{COMPOSITION_MARKER, GeneratePayload};

/// Owner recorded when a payment event carries no customer email.
pub const UNKNOWN_OWNER: &str = "unknown@unknown";

/// A license key as persisted in the key store.
///
/// `used` only ever moves from false to true. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    /// Customer email, or [`UNKNOWN_OWNER`].
    pub owner: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
}

impl KeyRecord {
    pub fn new(key: String, owner: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            key,
            owner,
            issued_at,
            used: false,
        }
    }

    pub fn has_deliverable_owner(&self) -> bool {
        self.owner != UNKNOWN_OWNER
    }
}

/// How an entitlement was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    Master,
    License,
}

/// Elevated-tier grant carried in the caller's signed session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementToken {
    pub granted: bool,
    pub expires_at: DateTime<Utc>,
    pub source: EntitlementSource,
}

impl EntitlementToken {
    pub fn grant(source: EntitlementSource, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            granted: true,
            expires_at: now + ttl,
            source,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.granted && self.expires_at > now
    }
}

/// A generation request that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub content: String,
    pub category: String,
    pub premium: bool,
}

impl GenerationRequest {
    /// Compound selectors (e.g. `calm+chaotic`) cost the backend more compute.
    pub fn is_complex(&self) -> bool {
        self.category.contains(COMPOSITION_MARKER)
    }
}

impl From<GeneratePayload> for GenerationRequest {
    fn from(payload: GeneratePayload) -> Self {
        Self {
            content: payload.content,
            category: payload.category.trim().to_string(),
            premium: payload.premium,
        }
    }
}
