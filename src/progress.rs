//! # Progress Tracking
//!
//! Job progress snapshots persisted under `progress:<jobId>` and delivered to
//! per-job streams. A snapshot is always stored before it is delivered, so a
//! subscriber that attaches late can catch up with [`ProgressTracker::latest`].
//! Each stream has its own unbounded queue: a slow reader falls behind but
//! never misses a snapshot.
//!
//! Percentages never move backwards for a job that has not reached a terminal
//! status: an older snapshot arriving late is clamped to the stored value.

use crate::cache::{CacheClient, CacheTtl};
use crate::config::ProgressConfig;
use crate::constants::keys;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle status of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    pub status: JobStatus,
    /// Free-form stage label, e.g. `chunk 3/10`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    #[serde(default)]
    pub quarantined: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(job_id: impl Into<String>, status: JobStatus, processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            if status == JobStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (processed.min(total) as f64 / total as f64) * 100.0
        };

        Self {
            job_id: job_id.into(),
            job_type: None,
            status,
            stage: None,
            processed,
            total,
            percentage,
            quarantined: 0,
            processing_time_ms: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_quarantined(mut self, quarantined: usize) -> Self {
        self.quarantined = quarantined;
        self
    }

    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Observer notified of every stored snapshot, across all jobs
#[async_trait]
pub trait ProgressSubscriber: Send + Sync {
    async fn on_progress(&self, snapshot: &ProgressSnapshot);
}

type SenderMap = DashMap<String, Vec<(u64, mpsc::UnboundedSender<ProgressSnapshot>)>>;

/// Receiving end of a per-job progress channel.
///
/// Every snapshot stored while the stream is alive is delivered. The stream
/// ends after the job's first terminal snapshot; dropping it detaches it from
/// the tracker.
pub struct ProgressStream {
    job_id: String,
    subscriber_id: u64,
    pending: Option<ProgressSnapshot>,
    receiver: mpsc::UnboundedReceiver<ProgressSnapshot>,
    finished: bool,
    channels: Arc<SenderMap>,
}

impl fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStream")
            .field("job_id", &self.job_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ProgressStream {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if self.finished {
            return None;
        }
        let snapshot = match self.pending.take() {
            Some(snapshot) => snapshot,
            None => self.receiver.recv().await?,
        };
        if snapshot.status.is_terminal() {
            self.finished = true;
        }
        Some(snapshot)
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if let Some(mut senders) = self.channels.get_mut(&self.job_id) {
            senders.retain(|(id, _)| *id != self.subscriber_id);
        }
        self.channels
            .remove_if(&self.job_id, |_, senders| senders.is_empty());
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    cache: CacheClient,
    config: ProgressConfig,
    channels: Arc<SenderMap>,
    next_subscriber_id: Arc<AtomicU64>,
    subscribers: Arc<RwLock<Vec<Arc<dyn ProgressSubscriber>>>>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("config", &self.config)
            .field("open_channels", &self.channels.len())
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(cache: CacheClient, config: ProgressConfig) -> Self {
        Self {
            cache,
            config,
            channels: Arc::new(DashMap::new()),
            next_subscriber_id: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }

    /// Jobs with at least one attached stream
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    /// Stream of snapshots for `job_id`, starting with the next update.
    ///
    /// When the job already reached a terminal status the stream yields the
    /// stored terminal snapshot and ends.
    pub async fn subscribe(&self, job_id: &str) -> ProgressStream {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        // Attach before reading the stored snapshot so a terminal update
        // racing this call is seen by one path or the other
        self.channels
            .entry(job_id.to_string())
            .or_default()
            .push((subscriber_id, sender));

        let pending = match self.latest(job_id).await {
            Ok(Some(snapshot)) if snapshot.status.is_terminal() => Some(snapshot),
            Ok(_) => None,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not read stored progress for new subscriber");
                None
            }
        };

        ProgressStream {
            job_id: job_id.to_string(),
            subscriber_id,
            pending,
            receiver,
            finished: false,
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Last stored snapshot for `job_id`
    pub async fn latest(&self, job_id: &str) -> Result<Option<ProgressSnapshot>> {
        self.cache.get_typed(&keys::progress(job_id)).await
    }

    /// Store `snapshot`, then deliver it to subscribers.
    ///
    /// Returns the snapshot as stored, after clamping.
    pub async fn update(&self, mut snapshot: ProgressSnapshot) -> Result<ProgressSnapshot> {
        let key = keys::progress(&snapshot.job_id);

        if !snapshot.status.is_terminal() {
            if let Some(stored) = self.cache.get_typed::<ProgressSnapshot>(&key).await? {
                if !stored.status.is_terminal() && snapshot.percentage < stored.percentage {
                    debug!(
                        job_id = %snapshot.job_id,
                        stored = stored.percentage,
                        incoming = snapshot.percentage,
                        "Clamping out-of-order progress snapshot"
                    );
                    snapshot.percentage = stored.percentage;
                    snapshot.processed = snapshot.processed.max(stored.processed);
                }
            }
        }

        self.cache
            .set(
                &key,
                &snapshot,
                CacheTtl::Seconds(self.config.snapshot_ttl_seconds),
            )
            .await?;

        if snapshot.status.is_terminal() {
            // Dropping the senders ends every stream once it has drained
            if let Some((_, senders)) = self.channels.remove(&snapshot.job_id) {
                for (_, sender) in senders {
                    let _ = sender.send(snapshot.clone());
                }
            }
        } else if let Some(mut senders) = self.channels.get_mut(&snapshot.job_id) {
            senders.retain(|(_, sender)| sender.send(snapshot.clone()).is_ok());
        }

        let subscribers: Vec<_> = self.subscribers.read().iter().cloned().collect();
        for subscriber in subscribers {
            subscriber.on_progress(&snapshot).await;
        }

        Ok(snapshot)
    }
}
