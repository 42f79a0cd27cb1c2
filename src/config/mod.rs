//! # Configuration System
//!
//! Strongly-typed configuration for every component. Each component receives
//! its section at construction; there is no process-wide configuration
//! singleton, so isolated instances can run side by side in tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ledgerbatch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/ledgerbatch.yaml", "production")?;
//!
//! let chunk_size = manager.config().batch.chunk_size;
//! let redis_url = &manager.config().cache.redis_url;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{defaults, ttl};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerBatchConfig {
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub batch: BatchConfig,
    pub scaling: ScalingConfig,
    pub rate_limit: RateLimitConfig,
    pub progress: ProgressConfig,
}

impl LedgerBatchConfig {
    /// Validate every section, reporting the first offending field
    pub fn validate(&self) -> ConfigResult<()> {
        self.cache.validate()?;
        self.circuit_breaker.validate()?;
        self.batch.validate()?;
        self.scaling.validate()?;
        self.rate_limit.validate()?;
        self.progress.validate()
    }
}

/// Symbolic TTL buckets in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlBuckets {
    pub short_seconds: u64,
    pub medium_seconds: u64,
    pub long_seconds: u64,
}

impl Default for TtlBuckets {
    fn default() -> Self {
        Self {
            short_seconds: ttl::SHORT_SECONDS,
            medium_seconds: ttl::MEDIUM_SECONDS,
            long_seconds: ttl::LONG_SECONDS,
        }
    }
}

impl TtlBuckets {
    /// Largest bucket in use; tag sets are kept alive this long
    pub fn max_seconds(&self) -> u64 {
        self.short_seconds
            .max(self.medium_seconds)
            .max(self.long_seconds)
    }
}

/// Cache client and store connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub redis_url: String,
    /// Namespace prepended to every validated key
    pub key_prefix: Option<String>,
    pub ttl: TtlBuckets,
    /// COUNT hint for cursor-based SCAN
    pub scan_count: usize,
    pub connection_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            ttl: TtlBuckets::default(),
            scan_count: defaults::SCAN_COUNT,
            connection_timeout_ms: 5_000,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.redis_url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "cache.redis_url",
                "cache configuration",
            ));
        }
        if self.ttl.short_seconds == 0 || self.ttl.medium_seconds == 0 || self.ttl.long_seconds == 0
        {
            return Err(ConfigurationError::invalid_value(
                "cache.ttl",
                format!("{:?}", self.ttl),
                "TTL buckets must be greater than 0",
            ));
        }
        if self.scan_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.scan_count",
                "0",
                "scan count must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Circuit breaker thresholds for one protected resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is allowed
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::CIRCUIT_FAILURE_THRESHOLD,
            timeout_ms: defaults::CIRCUIT_TIMEOUT_MS,
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.failure_threshold",
                "0",
                "failure threshold must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Batch engine defaults; individual batches may override through `BatchOptions`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub checkpoint_interval: usize,
    /// Number of most recent results stored with each checkpoint
    pub checkpoint_tail_size: usize,
    pub max_retries: u32,
    pub backoff_delay_ms: u64,
    /// Per-invocation timeout of the chunk processor; `None` disables it
    pub chunk_timeout_ms: Option<u64>,
    pub quarantine_retention_seconds: u64,
    pub checkpoint_ttl_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            concurrency: defaults::CONCURRENCY,
            checkpoint_interval: defaults::CHECKPOINT_INTERVAL,
            checkpoint_tail_size: defaults::CHECKPOINT_TAIL_SIZE,
            max_retries: defaults::MAX_RETRIES,
            backoff_delay_ms: defaults::BACKOFF_DELAY_MS,
            chunk_timeout_ms: Some(defaults::CHUNK_TIMEOUT_MS),
            quarantine_retention_seconds: defaults::QUARANTINE_RETENTION_SECONDS,
            checkpoint_ttl_seconds: defaults::CHECKPOINT_TTL_SECONDS,
        }
    }
}

impl BatchConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.chunk_size",
                "0",
                "chunk size must be greater than 0",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.concurrency",
                "0",
                "concurrency must be greater than 0",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.checkpoint_interval",
                "0",
                "checkpoint interval must be greater than 0",
            ));
        }
        if self.quarantine_retention_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.quarantine_retention_seconds",
                "0",
                "quarantined records need a review window",
            ));
        }
        Ok(())
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }
}

/// Worker autoscaling policy for queue-backed jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_up_threshold: u64,
    pub scale_down_threshold: u64,
    pub scale_up_step: usize,
    pub scale_down_step: usize,
    pub health_check_interval_seconds: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: defaults::MIN_WORKERS,
            max_workers: defaults::MAX_WORKERS,
            scale_up_threshold: defaults::SCALE_UP_THRESHOLD,
            scale_down_threshold: defaults::SCALE_DOWN_THRESHOLD,
            scale_up_step: defaults::SCALE_UP_STEP,
            scale_down_step: defaults::SCALE_DOWN_STEP,
            health_check_interval_seconds: defaults::HEALTH_CHECK_INTERVAL_SECONDS,
        }
    }
}

impl ScalingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.min_workers > self.max_workers {
            return Err(ConfigurationError::invalid_value(
                "scaling.min_workers",
                self.min_workers.to_string(),
                format!("must not exceed max_workers ({})", self.max_workers),
            ));
        }
        if self.scale_down_threshold > self.scale_up_threshold {
            return Err(ConfigurationError::invalid_value(
                "scaling.scale_down_threshold",
                self.scale_down_threshold.to_string(),
                format!(
                    "must not exceed scale_up_threshold ({})",
                    self.scale_up_threshold
                ),
            ));
        }
        if self.scale_up_step == 0 || self.scale_down_step == 0 {
            return Err(ConfigurationError::invalid_value(
                "scaling.scale_step",
                "0",
                "scaling steps must be greater than 0",
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scaling.health_check_interval_seconds",
                "0",
                "health check interval must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

/// Fixed-window budget for calls to external services
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_ceiling: u64,
    pub default_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_ceiling: defaults::RATE_LIMIT_CEILING,
            default_window_seconds: defaults::RATE_LIMIT_WINDOW_SECONDS,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.default_ceiling == 0 || self.default_window_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit",
                format!("{}/{}s", self.default_ceiling, self.default_window_seconds),
                "ceiling and window must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub snapshot_ttl_seconds: u64,
    /// Write a `processing` snapshot every this many completed chunks
    pub update_every_chunks: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_seconds: defaults::PROGRESS_TTL_SECONDS,
            update_every_chunks: defaults::PROGRESS_UPDATE_EVERY_CHUNKS,
        }
    }
}

impl ProgressConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.update_every_chunks == 0 {
            return Err(ConfigurationError::invalid_value(
                "progress.update_every_chunks",
                "0",
                "update interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerBatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.chunk_size, 1_000);
        assert_eq!(config.cache.ttl.max_seconds(), 86_400);
        assert_eq!(config.batch.quarantine_retention_seconds, 604_800);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let mut config = LedgerBatchConfig::default();
        config.batch.chunk_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch.chunk_size"));
    }

    #[test]
    fn test_rejects_inverted_worker_bounds() {
        let mut config = LedgerBatchConfig::default();
        config.scaling.min_workers = 8;
        config.scaling.max_workers = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LedgerBatchConfig =
            serde_json::from_str(r#"{"batch": {"chunk_size": 250}}"#).unwrap();
        assert_eq!(config.batch.chunk_size, 250);
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.progress.update_every_chunks, 1);
    }

    #[test]
    fn test_rejects_zero_progress_interval() {
        let mut config = LedgerBatchConfig::default();
        config.progress.update_every_chunks = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("progress.update_every_chunks"));
    }
}
