//! # Retry and Quarantine Policy
//!
//! Failed chunks are retried up to `max_retries` times with exponential
//! backoff (`backoff_delay * 2^(attempt - 1)`, attempts counted from the first
//! retry). Chunks that still fail are quarantined and reported as failed
//! outcomes; the batch carries on.

use super::chunker::Chunk;
use super::processor::ChunkRunner;
use super::quarantine::QuarantineStore;
use super::ChunkOutcome;
use crate::error::{BatchError, Result};
use crate::logging::{duration_ms, log_chunk_operation};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_delay.saturating_mul(1u32 << exponent)
    }
}

/// Context shared by every retry of one job
pub(crate) struct RetryContext<'a, T, R> {
    pub job_id: &'a str,
    pub policy: RetryPolicy,
    pub runner: &'a ChunkRunner<T, R>,
    pub quarantine: &'a QuarantineStore,
    pub cancellation: &'a CancellationToken,
}

/// Retry each failed chunk, quarantining the ones that exhaust the budget.
///
/// Returns one outcome per input chunk, in input order. A breaker-open
/// rejection, an input-level error or cancellation stops the whole pass.
pub(crate) async fn handle_batch_failures<T, R>(
    failed: Vec<(Chunk<T>, BatchError)>,
    ctx: &RetryContext<'_, T, R>,
) -> Result<Vec<ChunkOutcome<R>>>
where
    T: Serialize + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut outcomes = Vec::with_capacity(failed.len());

    for (chunk, first_error) in failed {
        let outcome = retry_chunk(&chunk, first_error, ctx).await?;
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

async fn retry_chunk<T, R>(
    chunk: &Chunk<T>,
    first_error: BatchError,
    ctx: &RetryContext<'_, T, R>,
) -> Result<ChunkOutcome<R>>
where
    T: Serialize + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut last_error = first_error;
    let mut retries = 0;

    if last_error.is_retryable() {
        for attempt in 1..=ctx.policy.max_retries {
            retries = attempt;
            let delay = ctx.policy.delay_for_attempt(attempt);
            warn!(
                job_id = %ctx.job_id,
                chunk_id = chunk.id,
                attempt,
                max_retries = ctx.policy.max_retries,
                delay_ms = duration_ms(delay),
                error = %last_error,
                "🔄 Retrying failed chunk"
            );

            tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return Err(BatchError::cancelled(ctx.job_id));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match ctx.runner.run(chunk).await {
                Ok(result) => {
                    info!(
                        job_id = %ctx.job_id,
                        chunk_id = chunk.id,
                        retry_count = attempt,
                        "✅ Chunk succeeded after retry"
                    );
                    return Ok(ChunkOutcome::succeeded(chunk.id, result, attempt));
                }
                Err(e) if e.aborts_job() => return Err(e),
                Err(e) => last_error = e,
            }
        }
    }

    if last_error.aborts_job() {
        return Err(last_error);
    }

    let reason = last_error.to_string();
    let record = ctx
        .quarantine
        .quarantine_problematic_data(ctx.job_id, &[chunk], &reason)
        .await?;

    let quarantined = BatchError::quarantined(chunk.id, reason);
    log_chunk_operation(
        "quarantine",
        ctx.job_id,
        chunk.id,
        retries,
        "quarantined",
        Some(&quarantined.to_string()),
    );

    Ok(ChunkOutcome::quarantined(
        chunk.id,
        quarantined.to_string(),
        retries,
        record.id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::processor::ChunkProcessor;
    use crate::cache::CacheClient;
    use crate::config::{CacheConfig, CircuitBreakerConfig};
    use crate::resilience::CircuitBreaker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
    }

    struct FlakyProcessor {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChunkProcessor<u32, usize> for FlakyProcessor {
        async fn process(&self, chunk: &Chunk<u32>) -> anyhow::Result<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                anyhow::bail!("attempt {call} failed");
            }
            Ok(chunk.len())
        }
    }

    fn chunk() -> Chunk<u32> {
        Chunk {
            id: 0,
            data: vec![7, 8],
            start_index: 0,
            end_index: 1,
        }
    }

    async fn run_with(failures_before_success: u32) -> (ChunkOutcome<usize>, QuarantineStore) {
        let cache =
            CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default()).unwrap();
        let quarantine = QuarantineStore::new(cache, 604_800);
        let processor: Arc<dyn ChunkProcessor<u32, usize>> = Arc::new(FlakyProcessor {
            failures_before_success,
            calls: AtomicU32::new(0),
        });
        let runner = ChunkRunner::new(
            processor,
            Arc::new(CircuitBreaker::new("batch_engine", CircuitBreakerConfig::default())),
            None,
            None,
        );
        let token = CancellationToken::new();
        let ctx = RetryContext {
            job_id: "job",
            policy: RetryPolicy::new(3, Duration::from_millis(1_000)),
            runner: &runner,
            quarantine: &quarantine,
            cancellation: &token,
        };

        // The first attempt happens before the retry pass
        let first_error = runner.run(&chunk()).await.unwrap_err();
        let mut outcomes = handle_batch_failures(vec![(chunk(), first_error)], &ctx)
            .await
            .unwrap();
        (outcomes.remove(0), quarantine)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_within_budget_reports_retry_count() {
        let start = tokio::time::Instant::now();
        let (outcome, quarantine) = run_with(2).await;

        assert!(outcome.success);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.result, Some(2));
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(3_000));
        assert!(quarantine.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_quarantines_chunk() {
        let (outcome, quarantine) = run_with(u32::MAX).await;

        assert!(!outcome.success);
        assert_eq!(outcome.retry_count, 3);
        let error = outcome.error.as_deref().unwrap_or_default();
        assert!(error.starts_with("Chunk 0 quarantined:"), "{error}");
        assert!(error.contains("attempt 4 failed"));

        let records = quarantine.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(Some(records[0].id), outcome.quarantine_id);
    }
}
