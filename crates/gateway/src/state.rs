use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use stripe::Client as StripeClient;

use crate::{
    config::Config,
    services::{BackendRelay, EmailSender, EntitlementVerifier, KeyIssuer, RateLimitPolicy},
    stores::Stores,
};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Key store and rate limit counters.
    pub stores: Stores,
    /// Backend relay.
    pub relay: Arc<dyn BackendRelay>,
    /// License key minting.
    pub issuer: KeyIssuer,
    /// License key redemption.
    pub verifier: Arc<EntitlementVerifier>,
    /// Rate limit windows.
    pub limits: RateLimitPolicy,
    /// Email sender.
    pub email: Arc<dyn EmailSender>,
    /// Stripe client.
    pub stripe: StripeClient,
    /// Signs entitlement cookies.
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
