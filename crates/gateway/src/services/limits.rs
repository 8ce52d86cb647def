//! Per-caller request limits.
//!
//! Two independent fixed windows keyed by caller identity: a general window
//! over every API call, and a tighter generation window stacked on top of it
//! for the generation endpoint. Counters live in the [`RateLimiter`] store.
//! A counter backend failure lets the request through.

use std::sync::Arc;

use crate::{
    config::Config,
    error::AppError,
    middleware::identity::ClientIdentity,
    stores::{RateLimitResult, RateLimiter},
};

/// Which window a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    General,
    Generation,
}

impl LimitScope {
    fn key_prefix(self) -> &'static str {
        match self {
            LimitScope::General => "ratelimit:api",
            LimitScope::Generation => "ratelimit:generate",
        }
    }

    fn message(self) -> &'static str {
        match self {
            LimitScope::General => "Too many requests. Try again later.",
            LimitScope::Generation => "Too many generation requests. Wait a minute and try again.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub limit: i64,
    pub window_secs: u64,
}

#[derive(Clone)]
pub struct RateLimitPolicy {
    limiter: Arc<dyn RateLimiter>,
    general: WindowPolicy,
    generation: WindowPolicy,
}

impl RateLimitPolicy {
    pub fn new(limiter: Arc<dyn RateLimiter>, general: WindowPolicy, generation: WindowPolicy) -> Self {
        Self {
            limiter,
            general,
            generation,
        }
    }

    pub fn from_config(limiter: Arc<dyn RateLimiter>, config: &Config) -> Self {
        Self::new(
            limiter,
            WindowPolicy {
                limit: config.general_limit,
                window_secs: config.general_window_secs,
            },
            WindowPolicy {
                limit: config.generation_limit,
                window_secs: config.generation_window_secs,
            },
        )
    }

    fn window(&self, scope: LimitScope) -> WindowPolicy {
        match scope {
            LimitScope::General => self.general,
            LimitScope::Generation => self.generation,
        }
    }

    /// Count one request against `scope` for `identity`.
    pub async fn check(&self, identity: &ClientIdentity, scope: LimitScope) -> Result<(), AppError> {
        let window = self.window(scope);
        let key = format!("{}:{}", scope.key_prefix(), identity.as_str());

        match self
            .limiter
            .check_simple(&key, window.limit, window.window_secs)
            .await
        {
            Ok(RateLimitResult::Allowed(_)) => Ok(()),
            Ok(RateLimitResult::Exceeded(count)) => {
                tracing::warn!(identity = %identity, ?scope, count, "rate limit exceeded");
                Err(AppError::RateLimited {
                    message: scope.message(),
                    retry_after_secs: window.window_secs,
                })
            }
            Err(e) => {
                tracing::warn!(identity = %identity, ?scope, "rate limiter unavailable, allowing: {:#}", e);
                Ok(())
            }
        }
    }

    /// General window, then the generation window.
    pub async fn check_generation(&self, identity: &ClientIdentity) -> Result<(), AppError> {
        self.check(identity, LimitScope::General).await?;
        self.check(identity, LimitScope::Generation).await
    }
}
