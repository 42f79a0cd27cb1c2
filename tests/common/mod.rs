#![allow(dead_code)]

pub mod processors;

use ledgerbatch::cache::{CacheClient, CacheStore, InMemoryStore};
use ledgerbatch::config::{CircuitBreakerConfig, LedgerBatchConfig};
use ledgerbatch::constants::components;
use ledgerbatch::resilience::CircuitBreakerManager;
use ledgerbatch::BatchEngine;
use std::sync::Arc;

/// Engine, cache and breakers wired over one shared in-memory store
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub breakers: CircuitBreakerManager,
    pub cache: CacheClient,
    pub engine: BatchEngine,
    pub config: LedgerBatchConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: LedgerBatchConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
        let cache = CacheClient::new(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            breakers.get_circuit_breaker(components::CACHE),
            config.cache.clone(),
        )
        .expect("valid cache config");
        let engine = BatchEngine::new(cache.clone(), &breakers, &config);

        Self {
            store,
            breakers,
            cache,
            engine,
            config,
        }
    }
}

/// Defaults with short backoff so paused-clock tests stay readable
pub fn test_config() -> LedgerBatchConfig {
    let mut config = LedgerBatchConfig::default();
    config.batch.backoff_delay_ms = 1_000;
    config.batch.chunk_timeout_ms = None;
    config
}

pub fn breaker_config(failure_threshold: u32, timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        timeout_ms,
    }
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ledgerbatch=debug")
        .with_test_writer()
        .try_init();
}
