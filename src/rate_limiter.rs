//! # Rate Limiter
//!
//! Fixed-window call budget for external services, counted under
//! `rate_limit:<key>`. When the budget is exhausted the caller sleeps out the
//! rest of the window instead of being rejected.
//!
//! The limiter is best-effort: reading the counter and incrementing it are two
//! separate store calls, so concurrent callers racing on the same key can be
//! admitted past the ceiling. Callers needing a hard gate must serialize
//! access per key themselves.

use crate::cache::CacheClient;
use crate::config::RateLimitConfig;
use crate::constants::keys;
use crate::error::{BatchError, Result};
use crate::logging::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one pass through the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitDecision {
    /// Admitted immediately; `count` calls used in the current window
    Admitted { count: u64 },
    /// Budget was exhausted; the caller slept out the window and was admitted
    Waited { waited: Duration },
}

/// Budget applied to one external service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub key: String,
    pub ceiling: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(key: impl Into<String>, ceiling: u64, window: Duration) -> Self {
        Self {
            key: key.into(),
            ceiling,
            window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: CacheClient,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: CacheClient, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// Rule for `key` using the configured default ceiling and window
    pub fn default_rule(&self, key: impl Into<String>) -> RateLimitRule {
        RateLimitRule::new(
            key,
            self.config.default_ceiling,
            Duration::from_secs(self.config.default_window_seconds),
        )
    }

    async fn current_count(&self, counter_key: &str) -> Result<u64> {
        Ok(self
            .cache
            .get_typed::<u64>(counter_key)
            .await?
            .unwrap_or(0))
    }

    /// Count one call against `key`, sleeping out the window when `ceiling`
    /// calls were already made in it.
    pub async fn manage_rate_limit(
        &self,
        key: &str,
        ceiling: u64,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        if ceiling == 0 {
            return Err(BatchError::validation("rate limit ceiling must be greater than 0"));
        }
        let window_seconds = window.as_secs().max(1);
        let counter_key = keys::rate_limit(key);

        let count = self.current_count(&counter_key).await?;
        if count >= ceiling {
            let remaining = match self.cache.ttl(&counter_key).await? {
                secs if secs > 0 => Duration::from_secs(secs as u64),
                _ => Duration::from_secs(window_seconds),
            };

            info!(
                key = %key,
                count,
                ceiling,
                wait_ms = duration_ms(remaining),
                "⏳ Rate limit reached, waiting for window to expire"
            );
            tokio::time::sleep(remaining).await;

            self.cache
                .pipeline()
                .delete(&counter_key)
                .increment(&counter_key, 1)
                .expire(&counter_key, window_seconds)
                .execute()
                .await?;
            return Ok(RateLimitDecision::Waited { waited: remaining });
        }

        let replies = self
            .cache
            .pipeline()
            .increment(&counter_key, 1)
            .expire(&counter_key, window_seconds)
            .execute()
            .await?;
        let count = replies
            .first()
            .and_then(|reply| reply.as_integer())
            .map_or(count + 1, |n| n.max(0) as u64);

        debug!(key = %key, count, ceiling, "Rate limit admitted");
        Ok(RateLimitDecision::Admitted { count })
    }

    pub async fn apply(&self, rule: &RateLimitRule) -> Result<RateLimitDecision> {
        self.manage_rate_limit(&rule.key, rule.ceiling, rule.window)
            .await
    }

    /// Calls left in the current window without consuming one
    pub async fn remaining(&self, key: &str, ceiling: u64) -> Result<u64> {
        let count = self.current_count(&keys::rate_limit(key)).await?;
        Ok(ceiling.saturating_sub(count))
    }
}
