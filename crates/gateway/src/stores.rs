//! Stateful stores.
//!
//! ## Stores
//!
//! - **keys** - Issued license keys, persisted as a JSON file
//! - **rate_limit** - Fixed-window request counters (Redis or in-process)
//!
//! ## Key File Layout
//!
//! ```text
//! [
//!   { "key": "<64 hex chars>", "owner": "buyer@example.com",
//!     "issued_at": "2026-10-19T12:00:00Z", "used": false }
//! ]
//! ```
//!
//! ## Rate Limit Key Patterns
//!
//! ```text
//! ratelimit:api:{identity}        → General API window (15 min)
//! ratelimit:generate:{identity}   → Generation window (1 min)
//! ```

mod keys;
mod rate_limit;

pub use keys::{FileKeyStore, KeyStore};
pub use rate_limit::{MemoryRateLimiter, RateLimitResult, RateLimiter, RedisRateLimiter};

#[cfg(test)]
pub use keys::MockKeyStore;
#[cfg(test)]
pub use rate_limit::MockRateLimiter;

use std::sync::Arc;

/// Collection of all stores.
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}
