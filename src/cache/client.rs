//! # Cache Client
//!
//! Typed get/set/TTL/set-ops/pipeline operations over a [`CacheStore`].
//! Keys are validated before any network call, values are serialized as
//! JSON, symbolic TTL buckets are resolved from configuration and every store
//! call runs through the cache circuit breaker: while it is open, calls fail
//! fast with [`BatchError::CircuitOpen`] without touching the store.

use super::memory::InMemoryStore;
use super::redis_store::RedisStore;
use super::store::{CacheStore, PipelineOp, PipelineReply};
use super::{validate_key, validate_pattern, CacheStats, CacheTtl, CacheValue};
use crate::config::{CacheConfig, CircuitBreakerConfig};
use crate::constants::components;
use crate::error::{BatchError, Result};
use crate::resilience::{CircuitBreaker, CircuitBreakerManager, CircuitEvent};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// Keys deleted per `DEL` when flushing by pattern
const FLUSH_BATCH_SIZE: usize = 100;

/// Cache client; cloning shares the store, breaker and statistics
#[derive(Debug, Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    breaker: Arc<CircuitBreaker>,
    config: Arc<CacheConfig>,
    stats: Arc<Mutex<CacheStats>>,
}

impl CacheClient {
    pub fn new(
        store: Arc<dyn CacheStore>,
        breaker: Arc<CircuitBreaker>,
        config: CacheConfig,
    ) -> Result<Self> {
        if let Some(prefix) = &config.key_prefix {
            validate_key(prefix)?;
        }

        Ok(Self {
            store,
            breaker,
            config: Arc::new(config),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        })
    }

    /// Connect to Redis, sharing the `cache` breaker of `breakers`
    pub async fn connect_redis(
        config: CacheConfig,
        breakers: &CircuitBreakerManager,
    ) -> Result<Self> {
        let store = RedisStore::connect(&config).await?;
        Self::new(
            Arc::new(store),
            breakers.get_circuit_breaker(components::CACHE),
            config,
        )
    }

    /// Process-local client with its own breaker
    pub fn in_memory(config: CacheConfig, breaker_config: CircuitBreakerConfig) -> Result<Self> {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CircuitBreaker::new(components::CACHE, breaker_config)),
            config,
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn subscribe_breaker_events(&self) -> broadcast::Receiver<CircuitEvent> {
        self.breaker.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    fn full_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    fn strip_prefix(&self, key: String) -> String {
        match &self.config.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|k| k.strip_prefix(':'))
                .map(str::to_string)
                .unwrap_or(key),
            None => key,
        }
    }

    fn validated_keys<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<String>> {
        keys.iter()
            .map(|key| {
                validate_key(key.as_ref())?;
                Ok(self.full_key(key.as_ref()))
            })
            .collect()
    }

    fn resolve_ttl(&self, ttl: CacheTtl) -> Result<Option<Duration>> {
        ttl.resolve(&self.config.ttl)
    }

    /// Run a store call through the breaker, counting store failures
    async fn protected<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = self.breaker.call(operation).await;
        if let Err(error) = &result {
            if !matches!(error, BatchError::CircuitOpen { .. }) {
                self.stats.lock().errors += 1;
            }
        }
        result
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: Vec<u8>) -> CacheValue<T> {
        match serde_json::from_slice(&bytes) {
            Ok(value) => CacheValue::Typed(value),
            Err(e) => {
                let error = BatchError::serialization(e.to_string());
                warn!(key = %key, error = %error, "Returning raw cached bytes");
                self.stats.lock().serialization_fallbacks += 1;
                CacheValue::Raw(bytes)
            }
        }
    }

    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| BatchError::serialization(e.to_string()))
    }

    /// Raw stored bytes, `None` on miss
    #[instrument(skip(self), level = "debug")]
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let full_key = self.full_key(key);

        let value = self.protected(|| self.store.get(&full_key)).await?;
        if value.is_some() {
            debug!("Cache HIT: {}", full_key);
            self.stats.lock().hits += 1;
        } else {
            debug!("Cache MISS: {}", full_key);
            self.stats.lock().misses += 1;
        }
        Ok(value)
    }

    /// Typed read; undecodable values come back as [`CacheValue::Raw`]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheValue<T>>> {
        Ok(self
            .get_raw(key)
            .await?
            .map(|bytes| self.decode(key, bytes)))
    }

    /// Typed read that treats undecodable values as a miss
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get::<T>(key).await?.and_then(CacheValue::into_typed))
    }

    /// Serialize and store `value`, silently overwriting any previous entry
    #[instrument(skip(self, value, ttl), level = "debug")]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<CacheTtl>,
    ) -> Result<()> {
        let bytes = Self::encode(value)?;
        self.set_raw(key, bytes, ttl).await
    }

    pub async fn set_raw(&self, key: &str, bytes: Vec<u8>, ttl: impl Into<CacheTtl>) -> Result<()> {
        validate_key(key)?;
        let ttl = self.resolve_ttl(ttl.into())?;
        let full_key = self.full_key(key);

        self.protected(|| self.store.set(&full_key, bytes, ttl))
            .await?;
        self.stats.lock().sets += 1;
        Ok(())
    }

    /// Delete `keys`, returning how many existed
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> Result<u64> {
        let full_keys = self.validated_keys(keys)?;
        if full_keys.is_empty() {
            return Ok(0);
        }

        let deleted = self.protected(|| self.store.delete(&full_keys)).await?;
        self.stats.lock().deletes += deleted;
        Ok(deleted)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.protected(|| self.store.exists(&full_key)).await
    }

    /// Set a new expiry; `false` when the key does not exist
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        validate_key(key)?;
        if seconds == 0 {
            return Err(BatchError::validation("expiry must be a positive number of seconds"));
        }
        let full_key = self.full_key(key);
        self.protected(|| self.store.expire(&full_key, Duration::from_secs(seconds)))
            .await
    }

    /// Remaining seconds, `-1` when the key has no expiry, `-2` when absent
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.protected(|| self.store.ttl(&full_key)).await
    }

    /// Atomic increment, returning the new value
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.protected(|| self.store.incr_by(&full_key, by)).await
    }

    /// Positional multi-read; missing entries are `None`
    pub async fn batch_get<T: DeserializeOwned, K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Result<Vec<Option<CacheValue<T>>>> {
        let full_keys = self.validated_keys(keys)?;
        if full_keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.protected(|| self.store.mget(&full_keys)).await?;

        let mut stats = Vec::with_capacity(values.len());
        let decoded = keys
            .iter()
            .zip(values)
            .map(|(key, value)| {
                stats.push(value.is_some());
                value.map(|bytes| self.decode(key.as_ref(), bytes))
            })
            .collect();

        {
            let mut counters = self.stats.lock();
            for hit in stats {
                if hit {
                    counters.hits += 1;
                } else {
                    counters.misses += 1;
                }
            }
        }
        Ok(decoded)
    }

    /// Write many entries with one pipelined round trip
    pub async fn batch_set<K, V, I>(&self, entries: I, ttl: impl Into<CacheTtl>) -> Result<usize>
    where
        K: AsRef<str>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        let ttl = ttl.into();
        let mut pipeline = self.pipeline();
        let mut count = 0;
        for (key, value) in entries {
            pipeline = pipeline.set(key.as_ref(), &value, ttl);
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }

        pipeline.execute().await?;
        self.stats.lock().sets += count as u64;
        Ok(count)
    }

    /// Start a pipeline; commands are sent in one round trip on `execute`
    pub fn pipeline(&self) -> CachePipeline<'_> {
        CachePipeline {
            client: self,
            ops: Vec::new(),
            error: None,
        }
    }

    pub async fn add_to_set<M: AsRef<str>>(&self, key: &str, members: &[M]) -> Result<u64> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        let members: Vec<String> = members.iter().map(|m| m.as_ref().to_string()).collect();
        self.protected(|| self.store.sadd(&full_key, &members)).await
    }

    pub async fn remove_from_set<M: AsRef<str>>(&self, key: &str, members: &[M]) -> Result<u64> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        let members: Vec<String> = members.iter().map(|m| m.as_ref().to_string()).collect();
        self.protected(|| self.store.srem(&full_key, &members)).await
    }

    pub async fn get_set_members(&self, key: &str) -> Result<Vec<String>> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.protected(|| self.store.smembers(&full_key)).await
    }

    pub async fn is_set_member(&self, key: &str, member: &str) -> Result<bool> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.protected(|| self.store.sismember(&full_key, member))
            .await
    }

    /// Enumerate keys matching a glob pattern with cursor-based scanning.
    ///
    /// Maintenance and debugging path: grouped invalidation goes through
    /// [`super::TagIndex`].
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        validate_pattern(pattern)?;
        let full_pattern = self.full_key(pattern);
        let count = self.config.scan_count;

        // SCAN may return a key more than once
        let mut found = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self
                .protected(|| self.store.scan(&full_pattern, cursor, count))
                .await?;
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(found
            .into_iter()
            .map(|key| self.strip_prefix(key))
            .collect())
    }

    /// Delete every key matching `pattern`, returning the number removed
    pub async fn flush_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            debug!("No keys found for pattern: {}", pattern);
            return Ok(0);
        }

        warn!(
            pattern = %pattern,
            key_count = keys.len(),
            "🧹 Flushing cache keys by pattern"
        );

        let mut deleted = 0;
        for batch in keys.chunks(FLUSH_BATCH_SIZE) {
            deleted += self.delete(batch).await?;
        }
        Ok(deleted)
    }

    /// `PING` through the breaker; failures are logged, not returned
    pub async fn health_check(&self) -> bool {
        match self.protected(|| self.store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache health check failed");
                false
            }
        }
    }
}

/// Buffered pipeline of cache commands
#[derive(Debug)]
pub struct CachePipeline<'a> {
    client: &'a CacheClient,
    ops: Vec<PipelineOp>,
    /// First validation failure; reported by `execute`
    error: Option<BatchError>,
}

impl CachePipeline<'_> {
    fn push(mut self, key: &str, build: impl FnOnce(String) -> Result<PipelineOp>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let op = validate_key(key).and_then(|_| build(self.client.full_key(key)));
        match op {
            Ok(op) => self.ops.push(op),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn set<T: Serialize + ?Sized>(self, key: &str, value: &T, ttl: impl Into<CacheTtl>) -> Self {
        let ttl = self.client.resolve_ttl(ttl.into());
        let value = CacheClient::encode(value);
        self.push(key, move |key| {
            Ok(PipelineOp::Set {
                key,
                value: value?,
                ttl: ttl?,
            })
        })
    }

    pub fn delete(self, key: &str) -> Self {
        self.push(key, |key| Ok(PipelineOp::Delete { keys: vec![key] }))
    }

    pub fn expire(self, key: &str, seconds: u64) -> Self {
        self.push(key, move |key| {
            if seconds == 0 {
                return Err(BatchError::validation(
                    "expiry must be a positive number of seconds",
                ));
            }
            Ok(PipelineOp::Expire {
                key,
                ttl: Duration::from_secs(seconds),
            })
        })
    }

    pub fn increment(self, key: &str, by: i64) -> Self {
        self.push(key, move |key| Ok(PipelineOp::IncrBy { key, by }))
    }

    pub fn add_to_set(self, key: &str, member: &str) -> Self {
        let member = member.to_string();
        self.push(key, move |key| {
            Ok(PipelineOp::SAdd {
                key,
                members: vec![member],
            })
        })
    }

    pub fn remove_from_set(self, key: &str, member: &str) -> Self {
        let member = member.to_string();
        self.push(key, move |key| {
            Ok(PipelineOp::SRem {
                key,
                members: vec![member],
            })
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Send all buffered commands; replies come back in submission order
    pub async fn execute(self) -> Result<Vec<PipelineReply>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client;
        let ops = self.ops;
        client.protected(|| client.store.pipeline(ops)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Category {
        code: String,
        confidence: f64,
    }

    fn client() -> CacheClient {
        CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default()).unwrap()
    }

    fn client_over(store: Arc<InMemoryStore>, threshold: u32) -> CacheClient {
        CacheClient::new(
            store,
            Arc::new(CircuitBreaker::new(
                "cache",
                CircuitBreakerConfig {
                    failure_threshold: threshold,
                    timeout_ms: 60_000,
                },
            )),
            CacheConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_miss() {
        let cache = client();
        let value = Category {
            code: "travel".to_string(),
            confidence: 0.92,
        };

        cache.set("txn:1", &value, CacheTtl::Medium).await.unwrap();
        let read = cache.get_typed::<Category>("txn:1").await.unwrap();
        assert_eq!(read, Some(value));

        assert!(cache.get::<Category>("txn:2").await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_undecodable_value_falls_back_to_raw() {
        let cache = client();
        cache
            .set_raw("legacy", b"not json".to_vec(), CacheTtl::Short)
            .await
            .unwrap();

        let value = cache.get::<Category>("legacy").await.unwrap().unwrap();
        assert_eq!(value, CacheValue::Raw(b"not json".to_vec()));
        assert_eq!(cache.stats().serialization_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_buckets() {
        let cache = client();
        cache.set("k", &1, CacheTtl::Short).await.unwrap();
        let ttl = cache.ttl("k").await.unwrap();
        assert!(ttl > 0 && ttl <= 300, "ttl was {ttl}");

        cache.set("p", &1, CacheTtl::Permanent).await.unwrap();
        assert_eq!(cache.ttl("p").await.unwrap(), -1);
        assert_eq!(cache.ttl("absent").await.unwrap(), -2);

        assert!(cache.expire("p", 30).await.unwrap());
        assert_eq!(cache.ttl("p").await.unwrap(), 30);
        assert!(!cache.expire("absent", 30).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_network() {
        let store = Arc::new(InMemoryStore::new());
        let cache = client_over(store.clone(), 5);

        let result = cache.set("bad key!", &1, CacheTtl::Short).await;
        assert!(matches!(result, Err(BatchError::Validation { .. })));
        assert!(cache.get_raw("").await.is_err());
        assert!(cache.delete(&["ok", "not ok"]).await.is_err());
        assert_eq!(store.command_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_exists_increment() {
        let cache = client();
        cache.set("a", &"x", CacheTtl::Short).await.unwrap();
        cache.set("b", &"y", CacheTtl::Short).await.unwrap();

        assert!(cache.exists("a").await.unwrap());
        assert_eq!(cache.delete(&["a", "b", "c"]).await.unwrap(), 2);
        assert!(!cache.exists("a").await.unwrap());

        assert_eq!(cache.increment("hits", 1).await.unwrap(), 1);
        assert_eq!(cache.increment("hits", 5).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_batch_get_and_set() {
        let cache = client();
        let written = cache
            .batch_set(vec![("r:1", 10), ("r:2", 20)], CacheTtl::Short)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let values: Vec<Option<CacheValue<i32>>> =
            cache.batch_get(&["r:1", "r:missing", "r:2"]).await.unwrap();
        assert_eq!(
            values,
            vec![
                Some(CacheValue::Typed(10)),
                None,
                Some(CacheValue::Typed(20))
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_reports_validation_error() {
        let store = Arc::new(InMemoryStore::new());
        let cache = client_over(store.clone(), 5);

        let result = cache
            .pipeline()
            .set("ok", &1, CacheTtl::Short)
            .increment("bad key", 1)
            .execute()
            .await;
        assert!(matches!(result, Err(BatchError::Validation { .. })));
        assert_eq!(store.command_count(), 0);

        let replies = cache
            .pipeline()
            .increment("n", 2)
            .add_to_set("s", "member")
            .execute()
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![PipelineReply::Integer(2), PipelineReply::Integer(1)]
        );
    }

    #[tokio::test]
    async fn test_set_operations() {
        let cache = client();
        assert_eq!(cache.add_to_set("s", &["a", "b"]).await.unwrap(), 2);
        assert!(cache.is_set_member("s", "a").await.unwrap());
        assert_eq!(cache.remove_from_set("s", &["a"]).await.unwrap(), 1);
        assert_eq!(cache.get_set_members("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_keys_and_flush_pattern_with_prefix() {
        let config = CacheConfig {
            key_prefix: Some("app".to_string()),
            scan_count: 3,
            ..Default::default()
        };
        let cache = CacheClient::in_memory(config, CircuitBreakerConfig::default()).unwrap();

        for i in 0..7 {
            cache
                .set(&format!("debug:{i}"), &i, CacheTtl::Short)
                .await
                .unwrap();
        }
        cache.set("keep", &0, CacheTtl::Short).await.unwrap();

        let keys = cache.keys("debug:*").await.unwrap();
        assert_eq!(keys.len(), 7);
        assert!(keys.iter().all(|k| k.starts_with("debug:")));

        assert_eq!(cache.flush_pattern("debug:*").await.unwrap(), 7);
        assert!(cache.keys("debug:*").await.unwrap().is_empty());
        assert!(cache.exists("keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        let store = Arc::new(InMemoryStore::new());
        let cache = client_over(store.clone(), 3);
        let mut events = cache.subscribe_breaker_events();

        store.set_unavailable(true);
        for _ in 0..3 {
            assert!(matches!(
                cache.get_raw("k").await,
                Err(BatchError::Store { .. })
            ));
        }
        assert_eq!(cache.breaker().state(), CircuitState::Open);
        assert!(events.recv().await.unwrap().is_opening());

        let before = store.command_count();
        store.set_unavailable(false);
        assert!(matches!(
            cache.get_raw("k").await,
            Err(BatchError::CircuitOpen { .. })
        ));
        assert!(!cache.health_check().await);
        assert_eq!(store.command_count(), before);
        assert_eq!(cache.stats().errors, 3);
    }
}
