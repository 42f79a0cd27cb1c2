//! Periodic scaling task.
//!
//! Every tick the monitor asks a [`QueueDepthSource`] for the backlog of each
//! registered queue and feeds it to the [`WorkerScaler`]. `stop()` signals the
//! loop and waits for it to exit.

use super::{ScalingAction, WorkerScaler};
use crate::error::Result;
use crate::logging::duration_ms;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: u64,
    pub active_jobs: u64,
}

/// Backlog observations for queue-backed jobs
#[async_trait]
pub trait QueueDepthSource: Send + Sync {
    async fn queue_stats(&self, queue: &str) -> Result<QueueStats>;
}

#[derive(Debug)]
pub struct ScalingMonitor {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ScalingMonitor {
    /// Tick at the scaler's configured `health_check_interval_seconds`
    pub fn from_config(scaler: Arc<WorkerScaler>, source: Arc<dyn QueueDepthSource>) -> Self {
        let interval = scaler.config().health_check_interval();
        Self::start(scaler, source, interval)
    }

    pub fn start(
        scaler: Arc<WorkerScaler>,
        source: Arc<dyn QueueDepthSource>,
        interval: Duration,
    ) -> Self {
        info!(
            interval_ms = duration_ms(interval),
            "🔄 SCALING: Starting scaling monitor"
        );
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        Self::scaling_cycle(&scaler, source.as_ref()).await;
                    }
                    _ = shutdown_signal.notified() => {
                        info!("Scaling monitor shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    async fn scaling_cycle(scaler: &WorkerScaler, source: &dyn QueueDepthSource) {
        for queue in scaler.queues() {
            match source.queue_stats(&queue).await {
                Ok(stats) => {
                    if let action @ (ScalingAction::ScaleUp { .. } | ScalingAction::ScaleDown { .. }) =
                        scaler.scale_workers(&queue, stats.depth, stats.active_jobs)
                    {
                        info!(queue = %queue, ?action, "SCALING: Applied scaling action");
                    }
                }
                Err(e) => warn!(queue = %queue, error = %e, "Failed to read queue depth"),
            }
        }
    }

    /// Signal the loop and wait for it to finish
    pub async fn stop(self) {
        // The stored permit covers a loop that is mid-cycle
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Scaling monitor task failed");
        }
    }
}
