//! Entitlement session carried in a signed cookie.
//!
//! A successful redemption stores an [`EntitlementToken`] as JSON in the
//! `vibegen_entitlement` cookie, signed with the server's cookie key. The
//! `Entitlement` extractor reads it back; a missing, tampered, unparsable or
//! expired cookie simply means no entitlement.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use chrono::Utc;

use crate::{models::EntitlementToken, state::AppState};

pub const ENTITLEMENT_COOKIE: &str = "vibegen_entitlement";

/// The caller's entitlement, if any.
#[derive(Debug, Clone, Default)]
pub struct Entitlement(pub Option<EntitlementToken>);

impl Entitlement {
    pub fn is_granted(&self) -> bool {
        self.0
            .as_ref()
            .is_some_and(|token| token.is_active(Utc::now()))
    }

    pub fn from_jar(jar: &SignedCookieJar) -> Self {
        let token = jar
            .get(ENTITLEMENT_COOKIE)
            .and_then(|cookie| serde_json::from_str::<EntitlementToken>(cookie.value()).ok());
        Self(token)
    }
}

impl FromRequestParts<AppState> for Entitlement {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = SignedCookieJar::<Key>::from_request_parts(parts, state).await?;
        Ok(Self::from_jar(&jar))
    }
}

/// Build the session cookie for `token`, living until the token expires.
pub fn entitlement_cookie(token: &EntitlementToken, secure: bool) -> anyhow::Result<Cookie<'static>> {
    let value = serde_json::to_string(token)?;
    let remaining = (token.expires_at - Utc::now()).num_seconds().max(0);

    Ok(Cookie::build((ENTITLEMENT_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(remaining))
        .build())
}
