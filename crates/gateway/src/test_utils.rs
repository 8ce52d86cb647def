//! Shared test utilities for handler tests.
//!
//! Provides a flexible `TestStateBuilder` for constructing `AppState`
//! instances with only the mocks needed for each test.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::test_utils::TestStateBuilder;
//!
//! let mut relay = MockBackendRelay::new();
//! relay.expect_relay().returning(|_| Ok(generation_result("{}")));
//!
//! let state = TestStateBuilder::new().with_relay(relay).build();
//! ```

use std::sync::Arc;

use axum::body::Bytes;
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use chrono::{Duration, Utc};

use crate::config::Config;
use crate::middleware::session::{Entitlement, entitlement_cookie};
use crate::models::{EntitlementSource, EntitlementToken};
use crate::services::{
    BackendRelay, EmailSender, EntitlementVerifier, GenerationResult, KeyIssuer,
    MockBackendRelay, MockEmailSender, RateLimitPolicy, RedemptionPolicy,
};
use crate::state::AppState;
use crate::stores::{KeyStore, MemoryRateLimiter, MockKeyStore, RateLimiter, Stores};

pub const TEST_MASTER_KEY: &str = "test-master-key";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Creates a test configuration with dummy values.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        port_fallback_attempts: 0,
        env: "test".to_string(),
        sentry_dsn: None,
        redis_url: None,
        smtp_url: None,
        resend_api_key: None,
        stripe_secret_key: "sk_test_xxx".to_string(),
        stripe_webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        stripe_price_id: "price_xxx".to_string(),
        checkout_success_url: "http://localhost/?checkout=success".to_string(),
        checkout_cancel_url: "http://localhost/?checkout=cancelled".to_string(),
        master_key: Some(TEST_MASTER_KEY.to_string()),
        key_store_path: "unused.json".to_string(),
        deny_reused_keys: false,
        session_secret: None,
        entitlement_ttl_days: 365,
        backend_host: "127.0.0.1".to_string(),
        backend_ports: vec![5000],
        simple_budget_secs: 45,
        complex_budget_secs: 90,
        probe_interval_secs: 0,
        general_limit: 100,
        general_window_secs: 900,
        generation_limit: 10,
        generation_window_secs: 60,
        trust_forwarded_for: false,
    }
}

/// A backend payload as the relay would return it.
pub fn generation_result(body: &'static str) -> GenerationResult {
    GenerationResult {
        content_type: Some("application/json".to_string()),
        body: Bytes::from_static(body.as_bytes()),
    }
}

/// An active entitlement, as read from a valid session cookie.
pub fn granted_entitlement() -> Entitlement {
    Entitlement(Some(EntitlementToken::grant(
        EntitlementSource::License,
        Utc::now(),
        Duration::days(365),
    )))
}

/// A signed cookie jar carrying an active entitlement.
pub fn entitled_jar(key: &Key) -> SignedCookieJar {
    let token = EntitlementToken::grant(EntitlementSource::License, Utc::now(), Duration::days(1));
    SignedCookieJar::new(key.clone()).add(entitlement_cookie(&token, false).unwrap())
}

/// Builder for constructing test `AppState` with custom mocks.
///
/// Uses default (empty) mocks for any store/service not explicitly set,
/// except the rate limiter which defaults to in-process counters.
pub struct TestStateBuilder {
    config: Config,
    key_store: Option<Arc<dyn KeyStore>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    relay: Option<MockBackendRelay>,
    email_sender: Option<MockEmailSender>,
}

impl TestStateBuilder {
    /// Creates a new builder with no mocks configured.
    pub fn new() -> Self {
        Self {
            config: test_config(),
            key_store: None,
            rate_limiter: None,
            relay: None,
            email_sender: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_key_store(mut self, store: impl KeyStore + 'static) -> Self {
        self.key_store = Some(Arc::new(store));
        self
    }

    pub fn with_shared_key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: impl RateLimiter + 'static) -> Self {
        self.rate_limiter = Some(Arc::new(limiter));
        self
    }

    pub fn with_relay(mut self, relay: MockBackendRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_email_sender(mut self, sender: MockEmailSender) -> Self {
        self.email_sender = Some(sender);
        self
    }

    /// Builds the `AppState` using configured mocks or defaults.
    pub fn build(self) -> AppState {
        let keys = self
            .key_store
            .unwrap_or_else(|| Arc::new(MockKeyStore::new()));
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(MemoryRateLimiter::new()));

        let policy = if self.config.deny_reused_keys {
            RedemptionPolicy::DenyReuse
        } else {
            RedemptionPolicy::AllowReuse
        };
        let verifier = EntitlementVerifier::new(
            self.config.master_key(),
            keys.clone(),
            policy,
            Duration::days(self.config.entitlement_ttl_days),
        );

        let relay = Arc::new(self.relay.unwrap_or_else(MockBackendRelay::new))
            as Arc<dyn BackendRelay>;
        let email = Arc::new(self.email_sender.unwrap_or_else(MockEmailSender::new))
            as Arc<dyn EmailSender>;
        let stripe = stripe::Client::new("sk_test_xxx");

        AppState {
            limits: RateLimitPolicy::from_config(rate_limiter.clone(), &self.config),
            issuer: KeyIssuer::new(keys.clone()),
            verifier: Arc::new(verifier),
            stores: Stores { keys, rate_limiter },
            relay,
            email,
            stripe,
            cookie_key: Key::generate(),
            config: self.config,
        }
    }
}

impl Default for TestStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
