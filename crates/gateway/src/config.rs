use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How many consecutive ports after `port` to try if it is taken.
    #[serde(default = "default_port_fallback_attempts")]
    pub port_fallback_attempts: u16,
    /// Set to "production" for JSON logging, anything else for human-readable.
    #[serde(default)]
    pub env: String,
    /// Sentry DSN for error tracking
    #[serde(default)]
    pub sentry_dsn: Option<String>,

    /// Redis URL for shared rate-limit counters. In-process counters when unset.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// SMTP URL for development email (e.g., smtp://localhost:1025)
    #[serde(default)]
    pub smtp_url: Option<String>,
    /// Resend API key for production email
    #[serde(default)]
    pub resend_api_key: Option<String>,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_id: String,
    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,
    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    /// Operator-provisioned key that always grants the elevated tier.
    #[serde(default)]
    pub master_key: Option<String>,
    /// JSON file holding issued license keys.
    #[serde(default = "default_key_store_path")]
    pub key_store_path: String,
    /// Refuse keys that were already redeemed once.
    #[serde(default)]
    pub deny_reused_keys: bool,
    /// Secret used to sign session cookies (at least 64 bytes).
    /// A random key is generated when unset, so sessions do not survive restarts.
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_entitlement_ttl_days")]
    pub entitlement_ttl_days: i64,

    #[serde(default = "default_backend_host")]
    pub backend_host: String,
    /// Candidate worker ports, tried in this order.
    #[serde(default = "default_backend_ports")]
    pub backend_ports: Vec<u16>,
    #[serde(default = "default_simple_budget_secs")]
    pub simple_budget_secs: u64,
    #[serde(default = "default_complex_budget_secs")]
    pub complex_budget_secs: u64,
    /// Background health probe period. 0 disables the prober.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_general_limit")]
    pub general_limit: i64,
    #[serde(default = "default_general_window_secs")]
    pub general_window_secs: u64,
    #[serde(default = "default_generation_limit")]
    pub generation_limit: i64,
    #[serde(default = "default_generation_window_secs")]
    pub generation_window_secs: u64,
    /// Identify callers by the first X-Forwarded-For entry (only behind a trusted proxy).
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// Candidate addresses in failover order.
    pub fn backend_addresses(&self) -> Vec<String> {
        self.backend_ports
            .iter()
            .map(|port| format!("{}:{}", self.backend_host, port))
            .collect()
    }

    pub fn simple_budget(&self) -> Duration {
        Duration::from_secs(self.simple_budget_secs)
    }

    pub fn complex_budget(&self) -> Duration {
        Duration::from_secs(self.complex_budget_secs)
    }

    /// Master key, ignoring an empty value.
    pub fn master_key(&self) -> Option<&str> {
        self.master_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_port_fallback_attempts() -> u16 {
    10
}

fn default_checkout_success_url() -> String {
    "http://localhost:3000/?checkout=success".to_string()
}

fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/?checkout=cancelled".to_string()
}

fn default_key_store_path() -> String {
    "data/license_keys.json".to_string()
}

fn default_entitlement_ttl_days() -> i64 {
    365
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_ports() -> Vec<u16> {
    vec![5000, 5001, 5002, 5003, 5004]
}

fn default_simple_budget_secs() -> u64 {
    45
}

fn default_complex_budget_secs() -> u64 {
    90
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_general_limit() -> i64 {
    100
}

fn default_general_window_secs() -> u64 {
    15 * 60
}

fn default_generation_limit() -> i64 {
    10
}

fn default_generation_window_secs() -> u64 {
    60
}
