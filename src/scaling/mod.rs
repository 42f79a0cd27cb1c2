//! # Worker Autoscaling
//!
//! Adjusts the worker count of queue-backed jobs from observed backlog:
//! scale up by a fixed step when the queue is deep, scale down by a fixed
//! step when it is shallow and nothing is running. Counts always stay within
//! `[min_workers, max_workers]`.

pub mod monitor;

pub use monitor::{QueueDepthSource, QueueStats, ScalingMonitor};

use crate::config::ScalingConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Scaling decision for one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingAction {
    ScaleUp { from: usize, to: usize },
    ScaleDown { from: usize, to: usize },
    NoChange,
}

#[derive(Debug)]
pub struct WorkerScaler {
    config: ScalingConfig,
    workers: Mutex<HashMap<String, usize>>,
}

impl WorkerScaler {
    pub fn new(config: ScalingConfig) -> Self {
        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "🎛️ SCALING: Creating worker scaler"
        );
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Track `queue`, starting at `min_workers`
    pub fn register_queue(&self, queue: &str) -> usize {
        *self
            .workers
            .lock()
            .entry(queue.to_string())
            .or_insert(self.config.min_workers)
    }

    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<_> = self.workers.lock().keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Configured worker count; unknown queues report `min_workers`
    pub fn current_workers(&self, queue: &str) -> usize {
        self.workers
            .lock()
            .get(queue)
            .copied()
            .unwrap_or(self.config.min_workers)
    }

    /// Apply one scaling decision to `queue` and return it
    pub fn scale_workers(&self, queue: &str, queue_depth: u64, active_jobs: u64) -> ScalingAction {
        let min = self.config.min_workers;
        let max = self.config.max_workers;

        let mut workers = self.workers.lock();
        let current = workers.entry(queue.to_string()).or_insert(min);
        let from = (*current).clamp(min, max);

        let action = if queue_depth > self.config.scale_up_threshold && from < max {
            ScalingAction::ScaleUp {
                from,
                to: (from + self.config.scale_up_step).min(max),
            }
        } else if queue_depth < self.config.scale_down_threshold && active_jobs == 0 && from > min
        {
            ScalingAction::ScaleDown {
                from,
                to: from.saturating_sub(self.config.scale_down_step).max(min),
            }
        } else {
            ScalingAction::NoChange
        };

        match action {
            ScalingAction::ScaleUp { to, .. } => {
                *current = to;
                info!(
                    queue = %queue,
                    queue_depth,
                    from,
                    to,
                    "📈 SCALING: Scaling workers up"
                );
            }
            ScalingAction::ScaleDown { to, .. } => {
                *current = to;
                info!(
                    queue = %queue,
                    queue_depth,
                    from,
                    to,
                    "📉 SCALING: Scaling workers down"
                );
            }
            ScalingAction::NoChange => {
                *current = from;
                debug!(queue = %queue, queue_depth, active_jobs, workers = from, "SCALING: No change");
            }
        }

        action
    }
}
