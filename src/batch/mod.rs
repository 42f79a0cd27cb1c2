//! # Batch Processing
//!
//! Splits large inputs into chunks and runs a caller-supplied processor per
//! chunk, sequentially or with a bounded worker pool. Progress and checkpoints
//! are written through the cache, failed chunks are retried with exponential
//! backoff and chunks that exhaust their retries are quarantined instead of
//! aborting the batch.
//!
//! ## Key Components
//!
//! - [`BatchEngine`] - job orchestration, cancellation, resume and status queries
//! - [`chunk_data`] - deterministic chunking
//! - [`ChunkProcessor`] - the unit of work supplied by callers
//! - [`QuarantineStore`] / [`CheckpointStore`] - persisted failure and resume state
//!
//! ## Example
//!
//! ```rust,no_run
//! use ledgerbatch::batch::{BatchEngine, BatchOptions};
//! use ledgerbatch::cache::CacheClient;
//! use ledgerbatch::config::LedgerBatchConfig;
//! use ledgerbatch::resilience::CircuitBreakerManager;
//!
//! # async fn example() -> ledgerbatch::Result<()> {
//! let config = LedgerBatchConfig::default();
//! let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
//! let cache = CacheClient::in_memory(config.cache.clone(), config.circuit_breaker.clone())?;
//! let engine = BatchEngine::new(cache, &breakers, &config);
//!
//! let transactions: Vec<u64> = (0..2_500).collect();
//! let result = engine
//!     .process_batch(
//!         "categorize",
//!         transactions,
//!         |rows: Vec<u64>| async move { Ok::<_, anyhow::Error>(rows.len()) },
//!         engine.options().with_chunk_size(500).parallel(4),
//!     )
//!     .await?;
//! assert_eq!(result.total_processed, 2_500);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod chunker;
pub mod engine;
pub(crate) mod parallel;
pub mod processor;
pub mod quarantine;
pub mod retry;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use chunker::{chunk_count, chunk_data, Chunk};
pub use engine::BatchEngine;
pub use processor::ChunkProcessor;
pub use quarantine::{QuarantineRecord, QuarantineStatus, QuarantineStore};
pub use retry::RetryPolicy;

use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::rate_limiter::RateLimitRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Itemized result of one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome<R> {
    pub chunk_id: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_id: Option<Uuid>,
    /// Outcome carried over from a checkpoint rather than produced by this run
    #[serde(default)]
    pub resumed: bool,
}

impl<R> ChunkOutcome<R> {
    pub fn succeeded(chunk_id: usize, result: R, retry_count: u32) -> Self {
        Self {
            chunk_id,
            success: true,
            result: Some(result),
            error: None,
            retry_count,
            quarantine_id: None,
            resumed: false,
        }
    }

    pub fn quarantined(
        chunk_id: usize,
        error: impl Into<String>,
        retry_count: u32,
        quarantine_id: Uuid,
    ) -> Self {
        Self {
            chunk_id,
            success: false,
            result: None,
            error: Some(error.into()),
            retry_count,
            quarantine_id: Some(quarantine_id),
            resumed: false,
        }
    }

    /// Placeholder for a chunk completed by an earlier run
    pub fn resumed(chunk_id: usize) -> Self {
        Self {
            chunk_id,
            success: true,
            result: None,
            error: None,
            retry_count: 0,
            quarantine_id: None,
            resumed: true,
        }
    }
}

/// Result of `process_batch`.
///
/// `success` is reported optimistically: a batch with quarantined chunks is
/// still successful, so callers inspect `quarantined` or `results` to detect
/// partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult<R> {
    pub job_id: String,
    pub success: bool,
    pub total_processed: usize,
    pub processing_time: Duration,
    /// One outcome per chunk, indexed by chunk id
    pub results: Vec<ChunkOutcome<R>>,
    pub quarantined: usize,
    pub failed_chunks: Vec<usize>,
    pub resumed_chunks: usize,
}

impl<R> BatchResult<R> {
    pub fn has_partial_failure(&self) -> bool {
        self.quarantined > 0
    }

    /// Results of successful chunks in chunk order
    pub fn successful_results(&self) -> impl Iterator<Item = &R> {
        self.results.iter().filter_map(|o| o.result.as_ref())
    }
}

/// Options for one `process_batch` call
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub chunk_size: usize,
    pub parallel: bool,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_delay: Duration,
    pub checkpoint_interval: usize,
    pub chunk_timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    /// Continue this job from its last checkpoint instead of starting a new one
    pub resume_job_id: Option<String>,
    /// Queue whose scaled worker count sets the parallel concurrency
    pub queue: Option<String>,
    pub rate_limit: Option<RateLimitRule>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            parallel: false,
            concurrency: config.concurrency,
            max_retries: config.max_retries,
            backoff_delay: config.backoff_delay(),
            checkpoint_interval: config.checkpoint_interval,
            chunk_timeout: config.chunk_timeout(),
            cancellation: None,
            resume_job_id: None,
            queue: None,
            rate_limit: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Run chunks on a pool of `concurrency` workers
    pub fn parallel(mut self, concurrency: usize) -> Self {
        self.parallel = true;
        self.concurrency = concurrency;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_delay(mut self, backoff_delay: Duration) -> Self {
        self.backoff_delay = backoff_delay;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn resume(mut self, job_id: impl Into<String>) -> Self {
        self.resume_job_id = Some(job_id.into());
        self
    }

    pub fn for_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BatchError::validation("chunk_size must be greater than 0"));
        }
        if self.parallel && self.concurrency == 0 && self.queue.is_none() {
            return Err(BatchError::validation(
                "concurrency must be greater than 0 in parallel mode",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(BatchError::validation(
                "checkpoint_interval must be greater than 0",
            ));
        }
        if self.chunk_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BatchError::validation("chunk_timeout must be positive"));
        }
        if let Some(rule) = &self.rate_limit {
            if rule.ceiling == 0 || rule.window.is_zero() {
                return Err(BatchError::validation(
                    "rate limit ceiling and window must be positive",
                ));
            }
        }
        Ok(())
    }
}
