//! Redis-backed [`CacheStore`] over a multiplexed connection manager

use super::store::{CacheStore, PipelineOp, PipelineReply};
use crate::config::CacheConfig;
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Redis store; cloning shares the underlying connection manager
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    url: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn store_error(operation: &str) -> impl FnOnce(redis::RedisError) -> BatchError + '_ {
    move |e| {
        error!(operation, error = %e, "Redis command failed");
        BatchError::store(operation, e.to_string())
    }
}

/// Whole seconds for `EX`/`EXPIRE`, never rounding a live TTL down to 0
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

fn set_command(key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("EX").arg(ttl_seconds(ttl));
    }
    cmd
}

impl RedisStore {
    /// Connect and verify the server answers `PING`
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        info!("Connecting Redis cache store");

        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| BatchError::configuration(format!("invalid redis url: {e}")))?;

        let connection = tokio::time::timeout(
            config.connection_timeout(),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| BatchError::timeout("redis_connect", config.connection_timeout_ms))?
        .map_err(store_error("CONNECT"))?;

        let store = Self {
            connection,
            url: config.redis_url.clone(),
        };
        store.ping().await?;

        info!("✅ Redis cache store connected");
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("GET"))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("MGET"))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let _: () = set_command(key, &value, ttl)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SET"))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("DEL"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("EXISTS"))?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("EXPIRE"))?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        redis::cmd("TTL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("TTL"))
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64> {
        redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("INCRBY"))
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        debug!(pattern, cursor, "SCAN");
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SCAN"))
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<Vec<PipelineReply>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                PipelineOp::Set { key, value, ttl } => {
                    pipe.add_command(set_command(key, value, *ttl));
                }
                PipelineOp::Delete { keys } => {
                    pipe.cmd("DEL").arg(keys);
                }
                PipelineOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds(*ttl));
                }
                PipelineOp::IncrBy { key, by } => {
                    pipe.cmd("INCRBY").arg(key).arg(*by);
                }
                PipelineOp::SAdd { key, members } => {
                    pipe.cmd("SADD").arg(key).arg(members);
                }
                PipelineOp::SRem { key, members } => {
                    pipe.cmd("SREM").arg(key).arg(members);
                }
            }
        }

        let replies: Vec<redis::Value> = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("PIPELINE"))?;

        Ok(replies
            .into_iter()
            .map(|value| match value {
                redis::Value::Int(n) => PipelineReply::Integer(n),
                _ => PipelineReply::Ok,
            })
            .collect())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SADD"))
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        redis::cmd("SREM")
            .arg(key)
            .arg(members)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SREM"))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SMEMBERS"))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("SISMEMBER"))
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(store_error("PING"))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(BatchError::store("PING", format!("unexpected reply: {reply}")))
        }
    }
}
