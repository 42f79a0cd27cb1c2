//! Periodic checkpoints under `checkpoint:<jobId>` for resuming a job after a
//! crash without reprocessing completed chunks.

use super::ChunkOutcome;
use crate::cache::{CacheClient, CacheTtl};
use crate::constants::keys;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<R> {
    pub job_id: String,
    /// Every chunk with an id up to and including this one has an outcome
    pub last_processed_chunk_index: usize,
    /// Most recent outcomes, oldest first
    pub tail_results: Vec<ChunkOutcome<R>>,
    pub timestamp: DateTime<Utc>,
}

impl<R> Checkpoint<R> {
    pub fn covers(&self, chunk_id: usize) -> bool {
        chunk_id <= self.last_processed_chunk_index
    }
}

/// Bounded buffer of the latest outcomes carried in each checkpoint
#[derive(Debug, Clone)]
pub(crate) struct OutcomeTail<R> {
    capacity: usize,
    outcomes: VecDeque<ChunkOutcome<R>>,
}

impl<R: Clone> OutcomeTail<R> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, outcome: ChunkOutcome<R>) {
        if self.capacity == 0 {
            return;
        }
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    pub(crate) fn to_vec(&self) -> Vec<ChunkOutcome<R>> {
        self.outcomes.iter().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    cache: CacheClient,
    ttl_seconds: u64,
}

impl CheckpointStore {
    pub fn new(cache: CacheClient, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub async fn save<R: Serialize>(&self, checkpoint: &Checkpoint<R>) -> Result<()> {
        self.cache
            .set(
                &keys::checkpoint(&checkpoint.job_id),
                checkpoint,
                CacheTtl::Seconds(self.ttl_seconds),
            )
            .await?;
        debug!(
            job_id = %checkpoint.job_id,
            last_processed = checkpoint.last_processed_chunk_index,
            "💾 Checkpoint saved"
        );
        Ok(())
    }

    pub async fn load<R: DeserializeOwned>(&self, job_id: &str) -> Result<Option<Checkpoint<R>>> {
        self.cache.get_typed(&keys::checkpoint(job_id)).await
    }

    pub async fn clear(&self, job_id: &str) -> Result<bool> {
        Ok(self.cache.delete(&[keys::checkpoint(job_id)]).await? > 0)
    }
}
