#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # LedgerBatch Core
//!
//! Resilient substrate for large, failure-prone bulk operations such as
//! AI-assisted categorization of thousands of transactions, bulk database
//! writes or spreadsheet-chunk processing.
//!
//! ## Overview
//!
//! Two tightly coupled pieces form the core:
//!
//! - a **cache client** with typed get/set/TTL/tag/pipeline operations over a
//!   Redis-like store, protected by a circuit breaker
//! - a **batch engine** that chunks large inputs, runs a caller-supplied
//!   processor per chunk sequentially or with bounded concurrency, tracks
//!   progress, checkpoints for resumability, retries failed chunks with
//!   exponential backoff and quarantines chunks that exhaust their retries
//!
//! ## Module Organization
//!
//! - [`resilience`] - circuit breakers and their registry
//! - [`cache`] - store interface, cache client and tag index
//! - [`progress`] - job progress snapshots and subscriptions
//! - [`rate_limiter`] - fixed-window call budgets for external services
//! - [`batch`] - chunking, the batch engine, retry, checkpoint and quarantine
//! - [`scaling`] - worker autoscaling for queue-backed jobs
//! - [`config`] - configuration structs and loading
//! - [`error`] - error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerbatch::batch::{BatchEngine, BatchResult};
//! use ledgerbatch::cache::CacheClient;
//! use ledgerbatch::config::ConfigManager;
//! use ledgerbatch::resilience::CircuitBreakerManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! ledgerbatch::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load_from_file("config/ledgerbatch.yaml", "production")?;
//! let config = manager.config();
//! let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
//!
//! let cache = CacheClient::connect_redis(config.cache.clone(), &breakers).await?;
//! let engine = BatchEngine::new(cache, &breakers, config);
//!
//! let rows: Vec<String> = vec!["2024-04-06,Office supplies,42.10".to_string()];
//! let result: BatchResult<usize> = engine
//!     .process_batch(
//!         "categorize",
//!         rows,
//!         |chunk: Vec<String>| async move { Ok::<_, anyhow::Error>(chunk.len()) },
//!         engine.options(),
//!     )
//!     .await?;
//!
//! if result.has_partial_failure() {
//!     println!("{} chunks quarantined for review", result.quarantined);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod progress;
pub mod rate_limiter;
pub mod resilience;
pub mod scaling;

pub use batch::{
    chunk_data, BatchEngine, BatchOptions, BatchResult, Checkpoint, Chunk, ChunkOutcome,
    ChunkProcessor, QuarantineRecord,
};
pub use cache::{CacheClient, CacheStore, CacheTtl, CacheValue, InMemoryStore, RedisStore, TagIndex};
pub use config::{ConfigManager, LedgerBatchConfig};
pub use error::{BatchError, Result};
pub use progress::{JobStatus, ProgressSnapshot, ProgressTracker};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use scaling::{ScalingAction, ScalingMonitor, WorkerScaler};
