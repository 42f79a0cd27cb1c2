//! Chunk processors with scripted failure behavior

use async_trait::async_trait;
use ledgerbatch::batch::{Chunk, ChunkProcessor};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sums each chunk; listed chunks fail their first `failures` attempts
#[derive(Debug, Default)]
pub struct FlakyProcessor {
    failures: u32,
    chunk_ids: HashSet<usize>,
    attempts: Mutex<HashMap<usize, u32>>,
}

impl FlakyProcessor {
    pub fn new(failures: u32, chunk_ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failures,
            chunk_ids: chunk_ids.into_iter().collect(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Fails the listed chunks on every attempt
    pub fn poisoned(chunk_ids: impl IntoIterator<Item = usize>) -> Self {
        Self::new(u32::MAX, chunk_ids)
    }

    pub fn attempts(&self, chunk_id: usize) -> u32 {
        self.attempts.lock().get(&chunk_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChunkProcessor<u64, u64> for FlakyProcessor {
    async fn process(&self, chunk: &Chunk<u64>) -> anyhow::Result<u64> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let attempt = attempts.entry(chunk.id).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if self.chunk_ids.contains(&chunk.id) && attempt <= self.failures {
            anyhow::bail!("upstream rejected chunk {} (attempt {attempt})", chunk.id);
        }
        Ok(chunk.data.iter().sum())
    }
}

/// Records how many chunks run at once and the order they finish in
#[derive(Debug)]
pub struct ConcurrencyProbe {
    delay: Duration,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub finished: Mutex<Vec<usize>>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkProcessor<u64, usize> for ConcurrencyProbe {
    async fn process(&self, chunk: &Chunk<u64>) -> anyhow::Result<usize> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        // Later chunks finish first
        let factor = 10u32.saturating_sub(chunk.id as u32).max(1);
        tokio::time::sleep(self.delay * factor).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().push(chunk.id);
        Ok(chunk.id)
    }
}
