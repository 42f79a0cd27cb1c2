use ledgerbatch::config::ConfigManager;
use std::path::PathBuf;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/ledgerbatch.yaml")
}

#[test]
fn test_shipped_config_loads_with_test_overrides() {
    let manager = ConfigManager::load_from_file(shipped_config(), "test").unwrap();
    let config = manager.config();

    assert_eq!(config.batch.chunk_size, 1_000);
    assert_eq!(config.batch.backoff_delay_ms, 10);
    assert_eq!(config.circuit_breaker.timeout_ms, 1_000);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.cache.key_prefix.as_deref(), Some("ledgerbatch"));
    assert_eq!(config.progress.snapshot_ttl_seconds, 86_400);
    assert_eq!(config.progress.update_every_chunks, 1);
    assert_eq!(config.scaling.health_check_interval().as_secs(), 30);

    // URLs without credentials pass through masking unchanged
    let debug = manager.debug_config();
    assert_eq!(debug["cache"]["redis_url"], "redis://127.0.0.1:6379");
}

#[test]
fn test_environment_without_override_file_uses_base() {
    let manager = ConfigManager::load_from_file(shipped_config(), "production").unwrap();
    assert_eq!(manager.config().batch.backoff_delay_ms, 1_000);
    assert_eq!(manager.environment(), "production");
}
