//! Tag-based grouped invalidation.
//!
//! A tag is a set stored under `tag:<name>` whose members are cache keys.
//! The set itself expires after the longest configured TTL bucket so that
//! abandoned tags do not accumulate.
//!
//! ```rust
//! use ledgerbatch::cache::{CacheClient, CacheTtl, TagIndex};
//! use ledgerbatch::config::{CacheConfig, CircuitBreakerConfig};
//!
//! # tokio_test::block_on(async {
//! let cache = CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default())?;
//! let tags = TagIndex::new(cache);
//!
//! tags.set_tagged("user:42:summary", &"Q1 totals", CacheTtl::Medium, &["user:42"])
//!     .await?;
//! assert_eq!(tags.invalidate_tag(&["user:42"]).await?, 2);
//! # Ok::<(), ledgerbatch::BatchError>(())
//! # }).unwrap();
//! ```

use super::client::CacheClient;
use super::{validate_key, CacheTtl};
use crate::constants::keys;
use crate::error::Result;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TagIndex {
    cache: CacheClient,
}

impl TagIndex {
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    /// Record `key` as a member of `tag` and refresh the tag's expiry
    pub async fn add_to_tag(&self, tag: &str, key: &str) -> Result<()> {
        validate_key(key)?;
        let tag_key = keys::tag(tag);
        let retention = self.cache.config().ttl.max_seconds();

        self.cache
            .pipeline()
            .add_to_set(&tag_key, key)
            .expire(&tag_key, retention)
            .execute()
            .await?;

        debug!(tag = %tag, key = %key, "Key tagged");
        Ok(())
    }

    pub async fn remove_from_tag(&self, tag: &str, key: &str) -> Result<bool> {
        let removed = self
            .cache
            .remove_from_set(&keys::tag(tag), &[key])
            .await?;
        Ok(removed > 0)
    }

    pub async fn tag_members(&self, tag: &str) -> Result<Vec<String>> {
        self.cache.get_set_members(&keys::tag(tag)).await
    }

    /// Write `value` under `key` and add it to every tag in `tags`
    pub async fn set_tagged<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<CacheTtl>,
        tags: &[&str],
    ) -> Result<()> {
        self.cache.set(key, value, ttl).await?;
        for tag in tags {
            self.add_to_tag(tag, key).await?;
        }
        Ok(())
    }

    /// Delete every member of each tag plus the tag sets themselves.
    ///
    /// Returns the total number of keys deleted. Tags that do not exist
    /// contribute nothing.
    pub async fn invalidate_tag<S: AsRef<str>>(&self, tags: &[S]) -> Result<u64> {
        let mut total = 0;

        for tag in tags {
            let tag = tag.as_ref();
            let tag_key = keys::tag(tag);
            let mut doomed = self.cache.get_set_members(&tag_key).await?;
            let member_count = doomed.len();
            doomed.push(tag_key);

            let deleted = self.cache.delete(&doomed).await?;
            total += deleted;

            info!(
                tag = %tag,
                members = member_count,
                deleted = deleted,
                "🏷️ Tag invalidated"
            );
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CircuitBreakerConfig};

    fn index() -> TagIndex {
        TagIndex::new(
            CacheClient::in_memory(CacheConfig::default(), CircuitBreakerConfig::default())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_invalidate_tag_deletes_members_and_tag() {
        let tags = index();
        let cache = tags.cache().clone();

        cache.set("a", &1, CacheTtl::Short).await.unwrap();
        cache.set("b", &2, CacheTtl::Short).await.unwrap();
        cache.set("c", &3, CacheTtl::Short).await.unwrap();
        tags.add_to_tag("t", "a").await.unwrap();
        tags.add_to_tag("t", "b").await.unwrap();

        let deleted = tags.invalidate_tag(&["t"]).await.unwrap();
        assert_eq!(deleted, 3);

        assert!(!cache.exists("a").await.unwrap());
        assert!(!cache.exists("b").await.unwrap());
        assert!(cache.exists("c").await.unwrap());
        assert!(!cache.exists("tag:t").await.unwrap());
    }

    #[tokio::test]
    async fn test_tag_expiry_uses_longest_bucket() {
        let tags = index();
        tags.add_to_tag("imports", "k").await.unwrap();
        let ttl = tags.cache().ttl("tag:imports").await.unwrap();
        assert!(ttl > 3_600 && ttl <= 86_400, "ttl was {ttl}");
    }

    #[tokio::test]
    async fn test_set_tagged_and_remove() {
        let tags = index();
        tags.set_tagged("user:1", &"alice", CacheTtl::Medium, &["users", "admins"])
            .await
            .unwrap();

        assert_eq!(tags.tag_members("users").await.unwrap(), vec!["user:1"]);
        assert!(tags.remove_from_tag("admins", "user:1").await.unwrap());
        assert!(tags.tag_members("admins").await.unwrap().is_empty());

        assert_eq!(tags.invalidate_tag(&["missing"]).await.unwrap(), 0);
    }
}
