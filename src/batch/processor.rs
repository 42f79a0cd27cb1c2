//! # Chunk Processors
//!
//! The caller-supplied unit of work and the guarded runner the engine uses to
//! invoke it. Every invocation goes through the engine's circuit breaker, the
//! optional rate limit and the optional per-chunk timeout.

use super::chunker::Chunk;
use crate::error::{BatchError, Result};
use crate::logging::duration_ms;
use crate::rate_limiter::{RateLimitRule, RateLimiter};
use crate::resilience::CircuitBreaker;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Opaque async work applied to one chunk.
///
/// Any error drives the retry and quarantine path. Closures of the form
/// `Fn(Vec<T>) -> impl Future<Output = anyhow::Result<R>>` implement this
/// trait directly.
#[async_trait]
pub trait ChunkProcessor<T, R>: Send + Sync {
    async fn process(&self, chunk: &Chunk<T>) -> anyhow::Result<R>;
}

#[async_trait]
impl<T, R, F, Fut> ChunkProcessor<T, R> for F
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send,
{
    async fn process(&self, chunk: &Chunk<T>) -> anyhow::Result<R> {
        (self)(chunk.data.clone()).await
    }
}

/// Invokes a processor with breaker, rate limit and timeout protection
pub(crate) struct ChunkRunner<T, R> {
    processor: Arc<dyn ChunkProcessor<T, R>>,
    breaker: Arc<CircuitBreaker>,
    timeout: Option<Duration>,
    rate_limit: Option<(RateLimiter, RateLimitRule)>,
}

impl<T, R> ChunkRunner<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        processor: Arc<dyn ChunkProcessor<T, R>>,
        breaker: Arc<CircuitBreaker>,
        timeout: Option<Duration>,
        rate_limit: Option<(RateLimiter, RateLimitRule)>,
    ) -> Self {
        Self {
            processor,
            breaker,
            timeout,
            rate_limit,
        }
    }

    async fn invoke(&self, chunk: &Chunk<T>) -> Result<R> {
        let work = AssertUnwindSafe(self.processor.process(chunk)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                BatchError::timeout(
                    format!("chunk_{}", chunk.id),
                    duration_ms(limit),
                )
            })?,
            None => work.await,
        };

        match outcome {
            Ok(result) => result.map_err(BatchError::from),
            Err(_) => {
                error!(chunk_id = chunk.id, "💥 Chunk processor panicked");
                Err(BatchError::transient(format!(
                    "chunk processor panicked on chunk {}",
                    chunk.id
                )))
            }
        }
    }

    /// Run the processor once for `chunk`
    pub(crate) async fn run(&self, chunk: &Chunk<T>) -> Result<R> {
        if let Some((limiter, rule)) = &self.rate_limit {
            limiter.apply(rule).await?;
        }

        debug!(chunk_id = chunk.id, records = chunk.len(), "Running chunk processor");
        self.breaker.call(|| self.invoke(chunk)).await
    }
}
