//! # Error Types
//!
//! Crate-wide error taxonomy. Per-chunk failures are recovered locally by the
//! batch engine; only validation, configuration, breaker-open and cancellation
//! conditions reach the caller of `process_batch`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Circuit breaker is open for component: {component}")]
    CircuitOpen { component: String },

    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Chunk {chunk_id} quarantined: {reason}")]
    Quarantined { chunk_id: usize, reason: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Store operation failed: {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Job cancelled: {job_id}")]
    Cancelled { job_id: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl BatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn circuit_open(component: impl Into<String>) -> Self {
        Self::CircuitOpen {
            component: component.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn quarantined(chunk_id: usize, reason: impl Into<String>) -> Self {
        Self::Quarantined {
            chunk_id,
            reason: reason.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn cancelled(job_id: impl Into<String>) -> Self {
        Self::Cancelled {
            job_id: job_id.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether a failed chunk carrying this error is eligible for another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Store { .. } | Self::Timeout { .. }
        )
    }

    /// Input-level failures come from the dataset or options, not a chunk
    pub fn is_input_level(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Configuration { .. })
    }

    /// Errors that end the whole job instead of being retried per chunk
    pub fn aborts_job(&self) -> bool {
        self.is_input_level()
            || matches!(self, Self::CircuitOpen { .. } | Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<redis::RedisError> for BatchError {
    fn from(error: redis::RedisError) -> Self {
        let operation = error.code().unwrap_or("redis").to_string();
        Self::store(operation, error.to_string())
    }
}

impl From<anyhow::Error> for BatchError {
    fn from(error: anyhow::Error) -> Self {
        Self::transient(format!("{error:#}"))
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(BatchError::transient("boom").is_retryable());
        assert!(BatchError::store("GET", "connection reset").is_retryable());
        assert!(BatchError::timeout("chunk_processor", 100).is_retryable());
        assert!(!BatchError::validation("bad key").is_retryable());
        assert!(!BatchError::circuit_open("cache").is_retryable());
        assert!(!BatchError::cancelled("job").is_retryable());
    }

    #[test]
    fn test_job_abort_classification() {
        assert!(BatchError::validation("bad key").aborts_job());
        assert!(BatchError::configuration("chunk_size").aborts_job());
        assert!(BatchError::circuit_open("batch_engine").aborts_job());
        assert!(BatchError::cancelled("job").aborts_job());
        assert!(!BatchError::transient("503").aborts_job());
        assert!(!BatchError::timeout("chunk_processor", 10).aborts_job());
        assert!(!BatchError::quarantined(1, "exhausted").aborts_job());
    }

    #[test]
    fn test_display_messages() {
        let err = BatchError::circuit_open("cache");
        assert_eq!(
            err.to_string(),
            "Circuit breaker is open for component: cache"
        );

        let err = BatchError::quarantined(2, "exhausted retries");
        assert_eq!(err.to_string(), "Chunk 2 quarantined: exhausted retries");
    }

    #[test]
    fn test_anyhow_maps_to_transient() {
        let err: BatchError = anyhow::anyhow!("upstream 503").into();
        assert!(matches!(err, BatchError::Transient { .. }));
        assert!(err.is_retryable());
    }
}
