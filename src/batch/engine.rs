//! # Batch Engine
//!
//! Orchestrates one batch job end to end:
//!
//! 1. generates the job id `<jobType>_<epochMillis>_<base36 suffix>`
//! 2. writes a `starting` snapshot
//! 3. chunks the input
//! 4. runs the chunks sequentially or on the worker pool, retrying and
//!    quarantining failures, updating progress every `update_every_chunks`
//!    chunks and checkpointing every `checkpoint_interval` chunks
//! 5. writes the terminal snapshot
//!
//! Only input-level errors, breaker-open rejections and cancellation abort a
//! job; a failing chunk never does.

use super::checkpoint::{Checkpoint, CheckpointStore, OutcomeTail};
use super::chunker::{chunk_data, Chunk};
use super::parallel::{ChunkCompletion, WorkerPool};
use super::processor::{ChunkProcessor, ChunkRunner};
use super::quarantine::{QuarantineRecord, QuarantineStore};
use super::retry::{handle_batch_failures, RetryContext};
use super::{BatchOptions, BatchResult, ChunkOutcome};
use crate::cache::{validate_key, CacheClient};
use crate::config::{BatchConfig, LedgerBatchConfig};
use crate::constants::{components, defaults, keys};
use crate::error::{BatchError, Result};
use crate::logging::{duration_ms, log_chunk_operation, log_job_operation};
use crate::progress::{JobStatus, ProgressSnapshot, ProgressTracker};
use crate::rate_limiter::RateLimiter;
use crate::resilience::{CircuitBreaker, CircuitBreakerManager};
use crate::scaling::WorkerScaler;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<jobType>_<epochMillis>_<random base36>`
pub fn generate_job_id(job_type: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..defaults::JOB_ID_SUFFIX_LENGTH)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{job_type}_{}_{suffix}", Utc::now().timestamp_millis())
}

#[derive(Debug, Clone)]
pub struct BatchEngine {
    cache: CacheClient,
    breaker: Arc<CircuitBreaker>,
    progress: ProgressTracker,
    checkpoints: CheckpointStore,
    quarantine: QuarantineStore,
    rate_limiter: RateLimiter,
    scaler: Option<Arc<WorkerScaler>>,
    config: BatchConfig,
    active_jobs: Arc<DashMap<String, CancellationToken>>,
}

impl BatchEngine {
    pub fn new(
        cache: CacheClient,
        breakers: &CircuitBreakerManager,
        config: &LedgerBatchConfig,
    ) -> Self {
        let batch = config.batch.clone();
        Self {
            breaker: breakers.get_circuit_breaker(components::BATCH_ENGINE),
            progress: ProgressTracker::new(cache.clone(), config.progress.clone()),
            checkpoints: CheckpointStore::new(cache.clone(), batch.checkpoint_ttl_seconds),
            quarantine: QuarantineStore::new(cache.clone(), batch.quarantine_retention_seconds),
            rate_limiter: RateLimiter::new(cache.clone(), config.rate_limit.clone()),
            scaler: None,
            config: batch,
            active_jobs: Arc::new(DashMap::new()),
            cache,
        }
    }

    /// Size parallel runs of queue-backed jobs from `scaler`
    pub fn with_scaler(mut self, scaler: Arc<WorkerScaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Options seeded from the engine's batch configuration
    pub fn options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.config)
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn quarantine(&self) -> &QuarantineStore {
        &self.quarantine
    }

    /// Ids of jobs currently running on this engine
    pub fn active_jobs(&self) -> Vec<String> {
        self.active_jobs.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop scheduling chunks for `job_id`; `false` when it is not running
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.active_jobs.get(job_id) {
            Some(token) => {
                info!(job_id = %job_id, "🛑 Cancelling batch job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<ProgressSnapshot>> {
        self.progress.latest(job_id).await
    }

    /// Last checkpoint written for `job_id`
    pub async fn resume_from_checkpoint<R: DeserializeOwned>(
        &self,
        job_id: &str,
    ) -> Result<Option<Checkpoint<R>>> {
        self.checkpoints.load(job_id).await
    }

    pub async fn list_quarantined(&self) -> Result<Vec<QuarantineRecord>> {
        self.quarantine.list().await
    }

    pub async fn get_quarantined(&self, id: Uuid) -> Result<Option<QuarantineRecord>> {
        self.quarantine.get(id).await
    }

    pub async fn release_quarantined(&self, id: Uuid) -> Result<bool> {
        self.quarantine.release(id).await
    }

    /// Run `processor` over `data` in chunks.
    ///
    /// Closures `Fn(Vec<T>) -> impl Future<Output = anyhow::Result<R>>` work
    /// as processors.
    pub async fn process_batch<T, R, P>(
        &self,
        job_type: &str,
        data: Vec<T>,
        processor: P,
        options: BatchOptions,
    ) -> Result<BatchResult<R>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        P: ChunkProcessor<T, R> + 'static,
    {
        self.process_batch_with(job_type, data, Arc::new(processor), options)
            .await
    }

    #[instrument(skip(self, data, processor, options), fields(records = data.len()))]
    pub async fn process_batch_with<T, R>(
        &self,
        job_type: &str,
        data: Vec<T>,
        processor: Arc<dyn ChunkProcessor<T, R>>,
        options: BatchOptions,
    ) -> Result<BatchResult<R>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let started = Instant::now();
        let job_id = match &options.resume_job_id {
            Some(job_id) => job_id.clone(),
            None => generate_job_id(job_type),
        };
        // Nothing can be persisted for a job whose keys are invalid
        validate_key(job_type)?;
        validate_key(&keys::checkpoint(&job_id))?;

        let total = data.len();
        let token = options.cancellation.clone().unwrap_or_default();
        self.active_jobs.insert(job_id.clone(), token.clone());

        log_job_operation("process_batch", &job_id, job_type, "starting", None);
        self.report(
            ProgressSnapshot::new(&job_id, JobStatus::Starting, 0, total).with_job_type(job_type),
        )
        .await;

        let outcome = self
            .run_job(job_type, &job_id, data, processor, &options, &token)
            .await;
        self.active_jobs.remove(&job_id);

        let elapsed = started.elapsed();
        let elapsed_ms = duration_ms(elapsed);

        match outcome {
            Ok(run) => {
                let result = BatchResult {
                    job_id: job_id.clone(),
                    success: true,
                    total_processed: run.processed,
                    processing_time: elapsed,
                    failed_chunks: run.failed_chunks(),
                    quarantined: run.quarantined,
                    resumed_chunks: run.resumed,
                    results: run.into_results(),
                };

                self.report(
                    ProgressSnapshot::new(&job_id, JobStatus::Completed, result.total_processed, total)
                        .with_job_type(job_type)
                        .with_quarantined(result.quarantined)
                        .with_processing_time_ms(elapsed_ms),
                )
                .await;

                info!(
                    job_id = %job_id,
                    total_processed = result.total_processed,
                    quarantined = result.quarantined,
                    duration_ms = elapsed_ms,
                    "✅ Batch job completed"
                );
                log_job_operation(
                    "process_batch",
                    &job_id,
                    job_type,
                    "completed",
                    Some(&format!("quarantined={}", result.quarantined)),
                );
                Ok(result)
            }
            Err(JobAbort { error: e, processed }) => {
                let status = if matches!(e, BatchError::Cancelled { .. }) {
                    warn!(job_id = %job_id, "🛑 Batch job cancelled");
                    JobStatus::Cancelled
                } else {
                    error!(job_id = %job_id, error = %e, "❌ Batch job failed");
                    JobStatus::Failed
                };

                self.report(
                    ProgressSnapshot::new(&job_id, status, processed, total)
                        .with_job_type(job_type)
                        .with_processing_time_ms(elapsed_ms)
                        .with_error(e.to_string()),
                )
                .await;
                log_job_operation(
                    "process_batch",
                    &job_id,
                    job_type,
                    &status.to_string(),
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn run_job<T, R>(
        &self,
        job_type: &str,
        job_id: &str,
        data: Vec<T>,
        processor: Arc<dyn ChunkProcessor<T, R>>,
        options: &BatchOptions,
        token: &CancellationToken,
    ) -> std::result::Result<JobRun<R>, JobAbort>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        options.validate()?;
        let chunks = chunk_data(&data, options.chunk_size)?;
        drop(data);

        let mut run = JobRun::new(
            job_type,
            job_id,
            &chunks,
            options.checkpoint_interval,
            self.config.checkpoint_tail_size,
        );

        if options.resume_job_id.is_some() {
            match self.checkpoints.load::<R>(job_id).await? {
                Some(checkpoint) => run.restore(checkpoint, &chunks)?,
                None => info!(job_id = %job_id, "No checkpoint found, starting from the first chunk"),
            }
        }

        let rate_limit = options
            .rate_limit
            .clone()
            .map(|rule| (self.rate_limiter.clone(), rule));
        let runner = Arc::new(ChunkRunner::new(
            processor,
            Arc::clone(&self.breaker),
            options.chunk_timeout,
            rate_limit,
        ));

        let pending: Vec<Chunk<T>> = chunks
            .into_iter()
            .filter(|chunk| !run.is_done(chunk.id))
            .collect();

        info!(
            job_id = %job_id,
            chunks = run.chunk_count(),
            pending = pending.len(),
            parallel = options.parallel,
            "🚀 Processing batch job"
        );

        let executed = if options.parallel {
            let concurrency = self.concurrency_for(options);
            self.process_chunks_parallel(pending, runner, concurrency, options, token, &mut run)
                .await
        } else {
            self.process_chunks_sequentially(pending, runner, options, token, &mut run)
                .await
        };

        match executed {
            Ok(()) => Ok(run),
            Err(error) => Err(JobAbort {
                error,
                processed: run.processed,
            }),
        }
    }

    fn concurrency_for(&self, options: &BatchOptions) -> usize {
        let workers = match (&options.queue, &self.scaler) {
            (Some(queue), Some(scaler)) => {
                let workers = scaler.current_workers(queue);
                debug!(queue = %queue, workers, "Using scaled worker count");
                workers
            }
            _ => options.concurrency,
        };
        workers.max(1)
    }

    /// Strict chunk order; a failed chunk is retried (and possibly
    /// quarantined) before the next one starts.
    async fn process_chunks_sequentially<T, R>(
        &self,
        chunks: Vec<Chunk<T>>,
        runner: Arc<ChunkRunner<T, R>>,
        options: &BatchOptions,
        token: &CancellationToken,
        run: &mut JobRun<R>,
    ) -> Result<()>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        R: Clone + Serialize + Send + Sync + 'static,
    {
        let job_id = run.job_id.clone();
        let retry = RetryContext {
            job_id: &job_id,
            policy: options.retry_policy(),
            runner: &runner,
            quarantine: &self.quarantine,
            cancellation: token,
        };

        for chunk in chunks {
            if token.is_cancelled() {
                return Err(BatchError::cancelled(&job_id));
            }

            let records = chunk.len();
            let result = tokio::select! {
                _ = token.cancelled() => return Err(BatchError::cancelled(&job_id)),
                result = runner.run(&chunk) => result,
            };

            let outcome = match result {
                Ok(value) => ChunkOutcome::succeeded(chunk.id, value, 0),
                Err(e) if e.aborts_job() => return Err(e),
                Err(e) => {
                    log_chunk_operation(
                        "process_chunk",
                        &job_id,
                        chunk.id,
                        0,
                        "failed",
                        Some(&e.to_string()),
                    );
                    let mut retried = handle_batch_failures(vec![(chunk, e)], &retry).await?;
                    match retried.pop() {
                        Some(outcome) => outcome,
                        None => continue,
                    }
                }
            };
            self.record(run, outcome, records).await;
        }

        Ok(())
    }

    /// Constant degree of parallelism over a worker pool; failures are
    /// retried once the pool has drained. Results are indexed by chunk id so
    /// completion order does not matter.
    async fn process_chunks_parallel<T, R>(
        &self,
        chunks: Vec<Chunk<T>>,
        runner: Arc<ChunkRunner<T, R>>,
        concurrency: usize,
        options: &BatchOptions,
        token: &CancellationToken,
        run: &mut JobRun<R>,
    ) -> Result<()>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        R: Clone + Serialize + Send + Sync + 'static,
    {
        let job_id = run.job_id.clone();
        let mut pool = WorkerPool::start(&job_id, chunks, Arc::clone(&runner), concurrency, token);
        let mut failed: Vec<(Chunk<T>, BatchError)> = Vec::new();
        let mut abort = None;

        while let Some(ChunkCompletion { chunk, result }) = pool.next().await {
            match result {
                Ok(value) => {
                    let records = chunk.len();
                    self.record(run, ChunkOutcome::succeeded(chunk.id, value, 0), records)
                        .await;
                }
                Err(e) if e.aborts_job() => {
                    pool.stop();
                    abort.get_or_insert(e);
                }
                Err(e) => {
                    log_chunk_operation(
                        "process_chunk",
                        &job_id,
                        chunk.id,
                        0,
                        "failed",
                        Some(&e.to_string()),
                    );
                    failed.push((chunk, e));
                }
            }
        }
        pool.join().await;

        if let Some(e) = abort {
            return Err(e);
        }
        if token.is_cancelled() {
            return Err(BatchError::cancelled(&job_id));
        }
        if failed.is_empty() {
            return Ok(());
        }

        failed.sort_by_key(|(chunk, _)| chunk.id);
        let sizes: Vec<usize> = failed.iter().map(|(chunk, _)| chunk.len()).collect();
        info!(
            job_id = %job_id,
            failed = failed.len(),
            "Retrying failed chunks after worker pool drained"
        );

        let retry = RetryContext {
            job_id: &job_id,
            policy: options.retry_policy(),
            runner: &runner,
            quarantine: &self.quarantine,
            cancellation: token,
        };
        let outcomes = handle_batch_failures(failed, &retry).await?;
        for (outcome, records) in outcomes.into_iter().zip(sizes) {
            self.record(run, outcome, records).await;
        }

        Ok(())
    }

    /// Book one chunk outcome: progress every `update_every_chunks`
    /// completions, checkpoint every `checkpoint_interval` completions.
    async fn record<R>(&self, run: &mut JobRun<R>, outcome: ChunkOutcome<R>, records: usize)
    where
        R: Clone + Serialize + Send + Sync,
    {
        let chunk_id = outcome.chunk_id;
        let checkpoint_due = run.complete(outcome, records);

        let update_every = self.progress.config().update_every_chunks.max(1);
        if run.completed_since_start % update_every == 0 {
            self.report(
                ProgressSnapshot::new(&run.job_id, JobStatus::Processing, run.processed, run.total)
                    .with_job_type(run.job_type.as_str())
                    .with_stage(format!("chunk {}/{}", chunk_id + 1, run.chunk_count()))
                    .with_quarantined(run.quarantined),
            )
            .await;
        }

        if checkpoint_due {
            if let Some(checkpoint) = run.checkpoint() {
                if let Err(e) = self.checkpoints.save(&checkpoint).await {
                    warn!(job_id = %run.job_id, error = %e, "Failed to save checkpoint");
                }
            }
        }
    }

    /// Progress writes are best-effort; a failing store never fails a job
    async fn report(&self, snapshot: ProgressSnapshot) {
        let job_id = snapshot.job_id.clone();
        if let Err(e) = self.progress.update(snapshot).await {
            warn!(job_id = %job_id, error = %e, "Failed to record progress");
        }
    }
}

/// Error that ended a job, with the records accounted for up to that point
struct JobAbort {
    error: BatchError,
    processed: usize,
}

impl From<BatchError> for JobAbort {
    fn from(error: BatchError) -> Self {
        Self {
            error,
            processed: 0,
        }
    }
}

/// Mutable bookkeeping of one running job
struct JobRun<R> {
    job_id: String,
    job_type: String,
    total: usize,
    chunk_sizes: Vec<usize>,
    results: Vec<Option<ChunkOutcome<R>>>,
    /// Every chunk below this id has an outcome
    watermark: usize,
    completed_since_start: usize,
    checkpoint_interval: usize,
    tail: OutcomeTail<R>,
    processed: usize,
    quarantined: usize,
    resumed: usize,
}

impl<R: Clone> JobRun<R> {
    fn new<T>(
        job_type: &str,
        job_id: &str,
        chunks: &[Chunk<T>],
        checkpoint_interval: usize,
        tail_size: usize,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            total: chunks.iter().map(Chunk::len).sum(),
            chunk_sizes: chunks.iter().map(Chunk::len).collect(),
            results: (0..chunks.len()).map(|_| None).collect(),
            watermark: 0,
            completed_since_start: 0,
            checkpoint_interval,
            tail: OutcomeTail::new(tail_size),
            processed: 0,
            quarantined: 0,
            resumed: 0,
        }
    }

    fn chunk_count(&self) -> usize {
        self.results.len()
    }

    fn is_done(&self, chunk_id: usize) -> bool {
        self.results.get(chunk_id).is_some_and(Option::is_some)
    }

    /// Mark every chunk the checkpoint covers as done
    fn restore<T>(&mut self, checkpoint: Checkpoint<R>, chunks: &[Chunk<T>]) -> Result<()> {
        let last = checkpoint.last_processed_chunk_index;
        if last >= chunks.len() {
            return Err(BatchError::validation(format!(
                "checkpoint for {} covers chunk {last} but the dataset has {} chunks",
                self.job_id,
                chunks.len()
            )));
        }

        let mut carried: Vec<Option<ChunkOutcome<R>>> = (0..=last).map(|_| None).collect();
        for outcome in checkpoint.tail_results {
            if outcome.chunk_id <= last {
                let chunk_id = outcome.chunk_id;
                carried[chunk_id] = Some(ChunkOutcome {
                    resumed: true,
                    ..outcome
                });
            }
        }

        for (chunk_id, outcome) in carried.into_iter().enumerate() {
            let outcome = outcome.unwrap_or_else(|| ChunkOutcome::resumed(chunk_id));
            if !outcome.success {
                self.quarantined += 1;
            }
            self.tail.push(outcome.clone());
            self.processed += self.chunk_sizes[chunk_id];
            self.results[chunk_id] = Some(outcome);
            self.resumed += 1;
        }
        self.watermark = last + 1;

        info!(
            job_id = %self.job_id,
            resumed_chunks = self.resumed,
            checkpoint_at = %checkpoint.timestamp,
            "⏩ Resuming batch job from checkpoint"
        );
        Ok(())
    }

    /// Store `outcome`; returns whether a checkpoint is due
    fn complete(&mut self, outcome: ChunkOutcome<R>, records: usize) -> bool {
        if !outcome.success {
            self.quarantined += 1;
        }
        self.processed += records;
        self.tail.push(outcome.clone());

        let chunk_id = outcome.chunk_id;
        if let Some(slot) = self.results.get_mut(chunk_id) {
            *slot = Some(outcome);
        }
        while self.is_done(self.watermark) {
            self.watermark += 1;
        }

        self.completed_since_start += 1;
        self.completed_since_start % self.checkpoint_interval == 0
    }

    fn checkpoint(&self) -> Option<Checkpoint<R>> {
        let last = self.watermark.checked_sub(1)?;
        Some(Checkpoint {
            job_id: self.job_id.clone(),
            last_processed_chunk_index: last,
            tail_results: self.tail.to_vec(),
            timestamp: Utc::now(),
        })
    }

    fn failed_chunks(&self) -> Vec<usize> {
        self.results
            .iter()
            .flatten()
            .filter(|o| !o.success)
            .map(|o| o.chunk_id)
            .collect()
    }

    fn into_results(self) -> Vec<ChunkOutcome<R>> {
        self.results.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CircuitBreakerConfig};
    use crate::progress::ProgressSubscriber;
    use crate::rate_limiter::RateLimitRule;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn engine() -> BatchEngine {
        let config = LedgerBatchConfig::default();
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
        let cache = CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default())
            .unwrap();
        BatchEngine::new(cache, &breakers, &config)
    }

    #[test]
    fn test_job_id_format() {
        let job_id = generate_job_id("categorize");
        let parts: Vec<_> = job_id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "categorize");
        assert!(parts[1].parse::<i64>().unwrap() > 0);
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_identity_processor_sequential() {
        let engine = engine();
        let data: Vec<u32> = (0..250).collect();

        let result: BatchResult<Vec<u32>> = engine
            .process_batch(
                "import",
                data.clone(),
                |rows: Vec<u32>| async move { Ok::<_, anyhow::Error>(rows) },
                engine.options().with_chunk_size(100),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.total_processed, 250);
        assert_eq!(result.results.len(), 3);
        assert!(result.results.iter().all(|o| o.success && o.retry_count == 0));
        let flattened: Vec<u32> = result.successful_results().flatten().copied().collect();
        assert_eq!(flattened, data);

        let status = engine.get_job_status(&result.job_id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.percentage, 100.0);
        assert!(engine.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_the_job() {
        let engine = engine();
        let error = engine
            .process_batch::<i32, usize, _>(
                "import",
                vec![1, 2, 3],
                |rows: Vec<i32>| async move { Ok::<_, anyhow::Error>(rows.len()) },
                engine.options().with_chunk_size(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, BatchError::Validation { .. }));

        // Job type with characters no key may carry
        let error = engine
            .process_batch::<i32, usize, _>(
                "bad type",
                vec![1],
                |rows: Vec<i32>| async move { Ok::<_, anyhow::Error>(rows.len()) },
                engine.options(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, BatchError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        assert!(!engine().cancel("nope"));
    }

    #[derive(Default)]
    struct StatusLog(Mutex<Vec<(JobStatus, usize)>>);

    #[async_trait::async_trait]
    impl ProgressSubscriber for StatusLog {
        async fn on_progress(&self, snapshot: &ProgressSnapshot) {
            self.0.lock().push((snapshot.status, snapshot.processed));
        }
    }

    #[tokio::test]
    async fn test_progress_written_every_configured_chunks() {
        let mut config = LedgerBatchConfig::default();
        config.progress.update_every_chunks = 2;
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
        let cache = CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default())
            .unwrap();
        let engine = BatchEngine::new(cache, &breakers, &config);
        let log = Arc::new(StatusLog::default());
        engine.progress().add_subscriber(log.clone());

        let result: BatchResult<usize> = engine
            .process_batch(
                "import",
                (0..50u32).collect(),
                |rows: Vec<u32>| async move { Ok::<_, anyhow::Error>(rows.len()) },
                engine.options().with_chunk_size(10),
            )
            .await
            .unwrap();
        assert_eq!(result.total_processed, 50);

        assert_eq!(
            *log.0.lock(),
            vec![
                (JobStatus::Starting, 0),
                (JobStatus::Processing, 20),
                (JobStatus::Processing, 40),
                (JobStatus::Completed, 50),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_level_error_fails_job_without_quarantine() {
        let engine = engine();
        // The counter key derived from this rule cannot be stored
        let rule = RateLimitRule::new("ai service", 5, Duration::from_secs(60));

        let error = engine
            .process_batch::<u32, usize, _>(
                "categorize",
                (0..30).collect(),
                |rows: Vec<u32>| async move { Ok::<_, anyhow::Error>(rows.len()) },
                engine.options().with_chunk_size(10).with_rate_limit(rule),
            )
            .await
            .unwrap_err();

        assert!(error.is_input_level());
        assert!(engine.list_quarantined().await.unwrap().is_empty());
        assert!(engine.active_jobs().is_empty());
    }

    #[test]
    fn test_watermark_advances_over_contiguous_outcomes() {
        let chunks = chunk_data(&[0u8; 5], 1).unwrap();
        let mut run = JobRun::<u8>::new("t", "t_1_a", &chunks, 2, 10);

        assert!(!run.complete(ChunkOutcome::succeeded(1, 0, 0), 1));
        assert!(run.checkpoint().is_none());

        assert!(run.complete(ChunkOutcome::succeeded(0, 0, 0), 1));
        assert_eq!(run.checkpoint().unwrap().last_processed_chunk_index, 1);

        run.complete(ChunkOutcome::succeeded(3, 0, 0), 1);
        assert_eq!(run.checkpoint().unwrap().last_processed_chunk_index, 1);
        assert_eq!(run.processed, 3);
    }
}
