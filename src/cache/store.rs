//! Narrow key/value store interface the cache client is built on

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One command queued in a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        keys: Vec<String>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    IncrBy {
        key: String,
        by: i64,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
}

impl PipelineOp {
    pub fn key(&self) -> Option<&str> {
        match self {
            PipelineOp::Set { key, .. }
            | PipelineOp::Expire { key, .. }
            | PipelineOp::IncrBy { key, .. }
            | PipelineOp::SAdd { key, .. }
            | PipelineOp::SRem { key, .. } => Some(key),
            PipelineOp::Delete { .. } => None,
        }
    }
}

/// Reply to a single pipelined command, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineReply {
    Ok,
    Integer(i64),
}

impl PipelineReply {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PipelineReply::Integer(n) => Some(*n),
            PipelineReply::Ok => None,
        }
    }
}

/// Remote key/value store reached by the cache client.
///
/// Implementations report every failure as a [`crate::BatchError::Store`] so
/// that the circuit breaker can account for it.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Positional multi-get; missing keys are `None`
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Overwrite `key`; `None` means no expiry
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Number of keys actually removed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// `false` when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining seconds, `-1` without expiry, `-2` when absent
    async fn ttl(&self, key: &str) -> Result<i64>;

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64>;

    /// Cursor-based enumeration; a returned cursor of `0` ends the iteration
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<Vec<PipelineReply>>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}
