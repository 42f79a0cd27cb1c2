//! # System Constants
//!
//! Persisted key layout, TTL buckets and default tunables shared by the cache
//! client and the batch engine.

/// Key namespaces written through the cache client
pub mod keys {
    pub const PROGRESS_PREFIX: &str = "progress";
    pub const CHECKPOINT_PREFIX: &str = "checkpoint";
    pub const QUARANTINE_PREFIX: &str = "quarantine";
    pub const TAG_PREFIX: &str = "tag";
    pub const RATE_LIMIT_PREFIX: &str = "rate_limit";

    /// Longest key accepted at the client boundary
    pub const MAX_KEY_LENGTH: usize = 250;

    pub fn progress(job_id: &str) -> String {
        format!("{PROGRESS_PREFIX}:{job_id}")
    }

    pub fn checkpoint(job_id: &str) -> String {
        format!("{CHECKPOINT_PREFIX}:{job_id}")
    }

    pub fn quarantine(record_id: &str) -> String {
        format!("{QUARANTINE_PREFIX}:{record_id}")
    }

    pub fn tag(tag: &str) -> String {
        format!("{TAG_PREFIX}:{tag}")
    }

    pub fn rate_limit(key: &str) -> String {
        format!("{RATE_LIMIT_PREFIX}:{key}")
    }
}

/// Symbolic TTL buckets, in seconds
pub mod ttl {
    pub const SHORT_SECONDS: u64 = 300;
    pub const MEDIUM_SECONDS: u64 = 3_600;
    pub const LONG_SECONDS: u64 = 86_400;
}

/// Default tunables used when no configuration overrides them
pub mod defaults {
    pub const CHUNK_SIZE: usize = 1_000;
    pub const CONCURRENCY: usize = 5;
    pub const CHECKPOINT_INTERVAL: usize = 10;
    pub const CHECKPOINT_TAIL_SIZE: usize = 100;
    pub const MAX_RETRIES: u32 = 3;
    pub const BACKOFF_DELAY_MS: u64 = 1_000;
    pub const CHUNK_TIMEOUT_MS: u64 = 300_000;

    /// Quarantined records are kept for manual review for seven days
    pub const QUARANTINE_RETENTION_SECONDS: u64 = 7 * 24 * 3_600;
    pub const PROGRESS_TTL_SECONDS: u64 = 86_400;
    pub const CHECKPOINT_TTL_SECONDS: u64 = 86_400;

    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_TIMEOUT_MS: u64 = 60_000;

    pub const MIN_WORKERS: usize = 1;
    pub const MAX_WORKERS: usize = 10;
    pub const SCALE_UP_THRESHOLD: u64 = 100;
    pub const SCALE_DOWN_THRESHOLD: u64 = 10;
    pub const SCALE_UP_STEP: usize = 2;
    pub const SCALE_DOWN_STEP: usize = 1;
    pub const HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;

    pub const RATE_LIMIT_CEILING: u64 = 60;
    pub const RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

    pub const SCAN_COUNT: usize = 100;
    pub const PROGRESS_UPDATE_EVERY_CHUNKS: usize = 1;

    /// Length of the random base36 suffix of a job id
    pub const JOB_ID_SUFFIX_LENGTH: usize = 9;
}

/// Component names used for circuit breakers and log fields
pub mod components {
    pub const CACHE: &str = "cache";
    pub const BATCH_ENGINE: &str = "batch_engine";
}
