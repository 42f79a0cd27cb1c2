//! # Bounded Worker Pool
//!
//! `concurrency` long-lived workers pull chunks from a shared queue until it
//! is empty, keeping a constant number of chunk executions in flight. Each
//! completion is reported back over a channel together with its chunk so the
//! collector can index results by chunk id and retry failures.

use super::chunker::Chunk;
use super::processor::ChunkRunner;
use crate::error::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// One finished chunk execution
#[derive(Debug)]
pub(crate) struct ChunkCompletion<T, R> {
    pub chunk: Chunk<T>,
    pub result: Result<R>,
}

pub(crate) struct WorkerPool<T, R> {
    completions: mpsc::UnboundedReceiver<ChunkCompletion<T, R>>,
    workers: Vec<JoinHandle<()>>,
    stop: CancellationToken,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Start `concurrency` workers over `chunks`; stops early when `parent`
    /// is cancelled.
    pub(crate) fn start(
        job_id: &str,
        chunks: Vec<Chunk<T>>,
        runner: Arc<ChunkRunner<T, R>>,
        concurrency: usize,
        parent: &CancellationToken,
    ) -> Self {
        let worker_count = concurrency.max(1).min(chunks.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let (sender, completions) = mpsc::unbounded_channel();
        let stop = parent.child_token();

        debug!(job_id = %job_id, worker_count, "Starting chunk worker pool");

        let workers = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let runner = Arc::clone(&runner);
                let sender = sender.clone();
                let stop = stop.clone();

                tokio::spawn(async move {
                    loop {
                        if stop.is_cancelled() {
                            break;
                        }
                        let Some(chunk) = queue.lock().pop_front() else {
                            break;
                        };

                        let result = tokio::select! {
                            _ = stop.cancelled() => break,
                            result = runner.run(&chunk) => result,
                        };

                        if sender.send(ChunkCompletion { chunk, result }).is_err() {
                            break;
                        }
                    }
                    debug!(worker_id, "Chunk worker finished");
                })
            })
            .collect();

        Self {
            completions,
            workers,
            stop,
        }
    }

    /// Next completion; `None` once every worker has exited
    pub(crate) async fn next(&mut self) -> Option<ChunkCompletion<T, R>> {
        self.completions.recv().await
    }

    /// Stop scheduling chunks and abandon the ones in flight
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for every worker to exit
    pub(crate) async fn join(self) {
        drop(self.completions);
        for joined in join_all(self.workers).await {
            if let Err(e) = joined {
                error!(error = %e, "Chunk worker task failed");
            }
        }
    }
}
