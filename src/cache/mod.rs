//! # Cache Layer
//!
//! Typed operations over a remote key/value store, each executed through the
//! cache circuit breaker, plus tag-based grouped invalidation.
//!
//! ## Key Components
//!
//! - [`CacheStore`] - narrow store interface ([`RedisStore`], [`InMemoryStore`])
//! - [`CacheClient`] - key validation, serialization, TTL buckets, breaker protection
//! - [`TagIndex`] - grouped invalidation of keys by tag name

pub mod client;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod tags;

pub use client::{CachePipeline, CacheClient};
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use store::{CacheStore, PipelineOp, PipelineReply};
pub use tags::TagIndex;

use crate::config::TtlBuckets;
use crate::constants::keys::MAX_KEY_LENGTH;
use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Expiry requested for a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTtl {
    /// Explicit number of seconds, must be positive
    Seconds(u64),
    Short,
    Medium,
    Long,
    /// No expiry
    Permanent,
}

impl CacheTtl {
    /// Resolve against the configured buckets; `None` means no expiry
    pub fn resolve(self, buckets: &TtlBuckets) -> Result<Option<Duration>> {
        let seconds = match self {
            CacheTtl::Seconds(0) => {
                return Err(BatchError::validation("TTL must be a positive number of seconds"))
            }
            CacheTtl::Seconds(s) => s,
            CacheTtl::Short => buckets.short_seconds,
            CacheTtl::Medium => buckets.medium_seconds,
            CacheTtl::Long => buckets.long_seconds,
            CacheTtl::Permanent => return Ok(None),
        };
        Ok(Some(Duration::from_secs(seconds)))
    }
}

impl From<u64> for CacheTtl {
    fn from(seconds: u64) -> Self {
        CacheTtl::Seconds(seconds)
    }
}

impl From<Option<u64>> for CacheTtl {
    fn from(seconds: Option<u64>) -> Self {
        seconds.map_or(CacheTtl::Permanent, CacheTtl::Seconds)
    }
}

impl FromStr for CacheTtl {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(CacheTtl::Short),
            "medium" => Ok(CacheTtl::Medium),
            "long" => Ok(CacheTtl::Long),
            "permanent" | "null" | "none" => Ok(CacheTtl::Permanent),
            other => other
                .parse::<u64>()
                .map(CacheTtl::Seconds)
                .map_err(|_| BatchError::validation(format!("unknown TTL bucket: {s}"))),
        }
    }
}

/// Result of a typed read. Values that fail to deserialize are handed back
/// as the raw stored bytes instead of failing the read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue<T> {
    Typed(T),
    Raw(Vec<u8>),
}

impl<T> CacheValue<T> {
    pub fn into_typed(self) -> Option<T> {
        match self {
            CacheValue::Typed(value) => Some(value),
            CacheValue::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, CacheValue::Raw(_))
    }
}

/// Cache statistics and metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub serialization_fallbacks: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '_' | '-')
}

/// Enforce `[A-Za-z0-9:._-]{1,250}` before any network call
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(BatchError::validation(format!(
            "cache key must be 1..={MAX_KEY_LENGTH} characters, got {}",
            key.len()
        )));
    }
    if let Some(bad) = key.chars().find(|c| !is_key_char(*c)) {
        return Err(BatchError::validation(format!(
            "cache key contains invalid character {bad:?}: {key}"
        )));
    }
    Ok(())
}

/// Same alphabet as keys plus the `*` and `?` glob wildcards
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() || pattern.len() > MAX_KEY_LENGTH {
        return Err(BatchError::validation("key pattern must be 1..=250 characters"));
    }
    if let Some(bad) = pattern
        .chars()
        .find(|c| !is_key_char(*c) && !matches!(c, '*' | '?'))
    {
        return Err(BatchError::validation(format!(
            "key pattern contains invalid character {bad:?}: {pattern}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(validate_key("progress:import_1712_abc.def-1").is_ok());
        assert!(validate_key(&"k".repeat(250)).is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key(&"k".repeat(251)).is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("wild*card").is_err());
        assert!(validate_key("ümlaut").is_err());
    }

    #[test]
    fn test_pattern_validation() {
        assert!(validate_pattern("quarantine:*").is_ok());
        assert!(validate_pattern("job_?").is_ok());
        assert!(validate_pattern("bad pattern").is_err());
    }

    #[test]
    fn test_ttl_resolution() {
        let buckets = TtlBuckets::default();
        assert_eq!(
            CacheTtl::Short.resolve(&buckets).unwrap(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            CacheTtl::Medium.resolve(&buckets).unwrap(),
            Some(Duration::from_secs(3_600))
        );
        assert_eq!(
            CacheTtl::Long.resolve(&buckets).unwrap(),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(CacheTtl::Permanent.resolve(&buckets).unwrap(), None);
        assert!(CacheTtl::Seconds(0).resolve(&buckets).is_err());
    }

    #[test]
    fn test_ttl_parsing() {
        assert_eq!("short".parse::<CacheTtl>().unwrap(), CacheTtl::Short);
        assert_eq!("permanent".parse::<CacheTtl>().unwrap(), CacheTtl::Permanent);
        assert_eq!("90".parse::<CacheTtl>().unwrap(), CacheTtl::Seconds(90));
        assert!("eventually".parse::<CacheTtl>().is_err());
        assert_eq!(CacheTtl::from(None), CacheTtl::Permanent);
    }
}
