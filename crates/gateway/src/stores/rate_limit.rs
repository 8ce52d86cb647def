//! Fixed-window rate limit counters (Redis or in-process).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

/// Rate limiter trait for checking and incrementing counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Health check - verify the counter backend is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Count one hit against `key` in a window of `ttl_secs` that starts at
    /// the first hit. Exceeded once the count passes `limit`.
    async fn check_simple(&self, key: &str, limit: i64, ttl_secs: u64) -> Result<RateLimitResult>;
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Under the limit, includes current count.
    Allowed(i64),
    /// Over the limit, includes current count.
    Exceeded(i64),
}

impl RateLimitResult {
    fn from_count(count: i64, limit: i64) -> Self {
        if count > limit {
            RateLimitResult::Exceeded(count)
        } else {
            RateLimitResult::Allowed(count)
        }
    }
}

/// Redis implementation of RateLimiter. Counters are shared by every
/// gateway process pointing at the same Redis.
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
}

impl RedisRateLimiter {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(result == "PONG")
    }

    async fn check_simple(&self, key: &str, limit: i64, ttl_secs: u64) -> Result<RateLimitResult> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = window_pipeline(key, ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(RateLimitResult::from_count(count, limit))
    }
}

/// INCR and EXPIRE in one MULTI/EXEC. `NX` only sets the TTL on a key that
/// has none, so the window still starts at the first hit.
fn window_pipeline(key: &str, ttl_secs: u64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("INCR")
        .arg(key)
        .cmd("EXPIRE")
        .arg(key)
        .arg(ttl_secs)
        .arg("NX")
        .ignore();
    pipe
}

/// Entries kept before expired windows are swept.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: i64,
    resets_at: Instant,
}

#[derive(Debug)]
struct Windows {
    entries: HashMap<String, Window>,
    /// Size at which the next sweep runs. Doubles past live entries so a
    /// full map is not rescanned on every request.
    sweep_at: usize,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: SWEEP_THRESHOLD,
        }
    }
}

impl Windows {
    fn sweep(&mut self, now: Instant) {
        self.entries.retain(|_, w| w.resets_at > now);
        self.sweep_at = (self.entries.len() * 2).max(SWEEP_THRESHOLD);
    }
}

/// In-process implementation of RateLimiter for single-instance deployments.
#[derive(Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<Windows>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_at(&self, key: &str, limit: i64, ttl: Duration, now: Instant) -> RateLimitResult {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.entries.len() >= windows.sweep_at {
            windows.sweep(now);
        }

        let window = windows
            .entries
            .entry(key.to_string())
            .and_modify(|w| {
                if w.resets_at <= now {
                    *w = Window {
                        count: 0,
                        resets_at: now + ttl,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                resets_at: now + ttl,
            });
        window.count += 1;

        RateLimitResult::from_count(window.count, limit)
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn check_simple(&self, key: &str, limit: i64, ttl_secs: u64) -> Result<RateLimitResult> {
        Ok(self.check_at(key, limit, Duration::from_secs(ttl_secs), Instant::now()))
    }
}
