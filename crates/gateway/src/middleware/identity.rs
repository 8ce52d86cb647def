//! Caller identity used to key rate limit windows.
//!
//! Usage: add `ClientIdentity` as an extractor parameter. It never rejects;
//! callers that cannot be identified share the `unknown` bucket.
//!
//! ```ignore
//! async fn my_handler(identity: ClientIdentity, ...) -> ... {
//!     state.limits.check(&identity, LimitScope::General).await?;
//! }
//! ```

use std::{convert::Infallible, fmt, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::state::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First X-Forwarded-For hop when trusted, else the socket peer.
    fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for {
            let forwarded = headers
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            if let Some(client) = forwarded {
                return Self::new(client);
            }
        }

        match peer {
            Some(addr) => Self::new(addr.ip().to_string()),
            None => Self::new(UNKNOWN),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self::resolve(
            &parts.headers,
            peer,
            state.config.trust_forwarded_for,
        ))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:51234".parse().unwrap())
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn uses_peer_ip_without_port() {
        let identity = ClientIdentity::resolve(&HeaderMap::new(), peer(), false);
        assert_eq!(identity.as_str(), "192.0.2.10");
    }

    #[test]
    fn ignores_forwarded_for_unless_trusted() {
        let identity = ClientIdentity::resolve(&forwarded("203.0.113.7"), peer(), false);
        assert_eq!(identity.as_str(), "192.0.2.10");
    }

    #[test]
    fn trusted_forwarded_for_uses_first_hop() {
        let identity =
            ClientIdentity::resolve(&forwarded("203.0.113.7, 10.0.0.1"), peer(), true);
        assert_eq!(identity.as_str(), "203.0.113.7");
    }

    #[test]
    fn blank_forwarded_for_falls_back_to_peer() {
        let identity = ClientIdentity::resolve(&forwarded(" "), peer(), true);
        assert_eq!(identity.as_str(), "192.0.2.10");
    }

    #[test]
    fn no_peer_is_unknown() {
        let identity = ClientIdentity::resolve(&HeaderMap::new(), None, true);
        assert_eq!(identity.to_string(), "unknown");
    }
}
