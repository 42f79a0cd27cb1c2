//! # Quarantine
//!
//! Chunks that exhaust their retry budget are set aside under
//! `quarantine:<uuid>` for manual review instead of blocking the batch.
//! Records expire after the configured retention window.

use super::chunker::Chunk;
use crate::cache::{CacheClient, CacheTtl};
use crate::constants::keys;
use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStatus {
    Quarantined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: Uuid,
    pub job_id: String,
    pub chunk_ids: Vec<usize>,
    pub reason: String,
    /// Raw records of every quarantined chunk, in chunk order
    pub records: serde_json::Value,
    pub quarantined_at: DateTime<Utc>,
    pub status: QuarantineStatus,
}

impl QuarantineRecord {
    pub fn key(&self) -> String {
        keys::quarantine(&self.id.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct QuarantineStore {
    cache: CacheClient,
    retention_seconds: u64,
}

impl QuarantineStore {
    pub fn new(cache: CacheClient, retention_seconds: u64) -> Self {
        Self {
            cache,
            retention_seconds,
        }
    }

    /// Persist `chunks` as one record keyed by a fresh UUID
    pub async fn quarantine_problematic_data<T: Serialize>(
        &self,
        job_id: &str,
        chunks: &[&Chunk<T>],
        reason: &str,
    ) -> Result<QuarantineRecord> {
        let records = chunks
            .iter()
            .map(|chunk| serde_json::to_value(&chunk.data))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BatchError::serialization(e.to_string()))?;

        let record = QuarantineRecord {
            id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            reason: reason.to_string(),
            records: serde_json::Value::Array(records),
            quarantined_at: Utc::now(),
            status: QuarantineStatus::Quarantined,
        };

        self.cache
            .set(
                &record.key(),
                &record,
                CacheTtl::Seconds(self.retention_seconds),
            )
            .await?;

        warn!(
            job_id = %job_id,
            quarantine_id = %record.id,
            chunk_ids = ?record.chunk_ids,
            reason = %reason,
            "🚧 Chunk quarantined for manual review"
        );
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QuarantineRecord>> {
        self.cache
            .get_typed(&keys::quarantine(&id.to_string()))
            .await
    }

    /// Every live record, oldest first
    pub async fn list(&self) -> Result<Vec<QuarantineRecord>> {
        let pattern = format!("{}:*", keys::QUARANTINE_PREFIX);
        let keys = self.cache.keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut records: Vec<QuarantineRecord> = self
            .cache
            .batch_get::<QuarantineRecord, _>(&keys)
            .await?
            .into_iter()
            .flatten()
            .filter_map(|value| value.into_typed())
            .collect();
        records.sort_by_key(|r| r.quarantined_at);
        Ok(records)
    }

    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<QuarantineRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .collect())
    }

    /// Remove a record after review; `false` when it no longer exists
    pub async fn release(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .cache
            .delete(&[keys::quarantine(&id.to_string())])
            .await?;
        if deleted > 0 {
            info!(quarantine_id = %id, "Quarantine record released");
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CircuitBreakerConfig};

    fn store() -> QuarantineStore {
        let cache =
            CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default()).unwrap();
        QuarantineStore::new(cache, 604_800)
    }

    fn chunk(id: usize, data: Vec<&'static str>) -> Chunk<&'static str> {
        let len = data.len();
        Chunk {
            id,
            data,
            start_index: id * 2,
            end_index: id * 2 + len - 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quarantine_list_release() {
        let store = store();
        let bad = chunk(2, vec!["row-4", "row-5"]);

        let record = store
            .quarantine_problematic_data("import_1", &[&bad], "parse failure")
            .await
            .unwrap();
        assert_eq!(record.status, QuarantineStatus::Quarantined);
        assert_eq!(record.chunk_ids, vec![2]);
        assert_eq!(record.records, serde_json::json!([["row-4", "row-5"]]));

        let ttl = store.cache.ttl(&record.key()).await.unwrap();
        assert_eq!(ttl, 604_800);

        assert_eq!(store.get(record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.list_for_job("import_1").await.unwrap().len(), 1);
        assert!(store.list_for_job("other").await.unwrap().is_empty());

        assert!(store.release(record.id).await.unwrap());
        assert!(!store.release(record.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }
}
