//! In-process [`CacheStore`] used by tests and single-process deployments.
//!
//! Mirrors the store semantics the cache client relies on: lazy expiry,
//! `-1`/`-2` TTL sentinels, `INCRBY` keeping the existing TTL, plain `SET`
//! clearing it, and cursor-based `SCAN` with `*`/`?` glob patterns.

use super::store::{CacheStore, PipelineOp, PipelineReply};
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    /// When set every command fails, simulating an unreachable store
    unavailable: AtomicBool,
    commands: AtomicU64,
    /// Open SCAN cursors, each resuming after the last key it covered
    scan_cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
}

fn wrong_type(operation: &str, key: &str) -> BatchError {
    BatchError::store(
        operation,
        format!("WRONGTYPE Operation against a key holding the wrong kind of value: {key}"),
    )
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage
    pub fn set_unavailable(&self, unavailable: bool) {
        debug!(unavailable, "In-memory store availability changed");
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Commands that reached the store, including failed ones
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BatchError::store(operation, "connection refused"));
        }
        Ok(())
    }

    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }

    fn apply(entries: &mut HashMap<String, Entry>, op: PipelineOp) -> Result<PipelineReply> {
        let now = Instant::now();
        match op {
            PipelineOp::Set { key, value, ttl } => {
                entries.insert(
                    key,
                    Entry {
                        value: StoredValue::Bytes(value),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                Ok(PipelineReply::Ok)
            }
            PipelineOp::Delete { keys } => {
                let mut removed = 0;
                for key in keys {
                    if let Some(entry) = entries.remove(&key) {
                        if !entry.is_expired(now) {
                            removed += 1;
                        }
                    }
                }
                Ok(PipelineReply::Integer(removed))
            }
            PipelineOp::Expire { key, ttl } => {
                Self::purge_if_expired(entries, &key, now);
                match entries.get_mut(&key) {
                    Some(entry) => {
                        entry.expires_at = Some(now + ttl);
                        Ok(PipelineReply::Integer(1))
                    }
                    None => Ok(PipelineReply::Integer(0)),
                }
            }
            PipelineOp::IncrBy { key, by } => {
                Self::purge_if_expired(entries, &key, now);
                let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                    value: StoredValue::Bytes(b"0".to_vec()),
                    expires_at: None,
                });
                let StoredValue::Bytes(bytes) = &entry.value else {
                    return Err(wrong_type("INCRBY", &key));
                };
                let current: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        BatchError::store("INCRBY", "value is not an integer or out of range")
                    })?;
                let next = current.checked_add(by).ok_or_else(|| {
                    BatchError::store("INCRBY", "increment or decrement would overflow")
                })?;
                entry.value = StoredValue::Bytes(next.to_string().into_bytes());
                Ok(PipelineReply::Integer(next))
            }
            PipelineOp::SAdd { key, members } => {
                Self::purge_if_expired(entries, &key, now);
                let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                    value: StoredValue::Set(BTreeSet::new()),
                    expires_at: None,
                });
                let StoredValue::Set(set) = &mut entry.value else {
                    return Err(wrong_type("SADD", &key));
                };
                let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                Ok(PipelineReply::Integer(added as i64))
            }
            PipelineOp::SRem { key, members } => {
                Self::purge_if_expired(entries, &key, now);
                let Some(entry) = entries.get_mut(&key) else {
                    return Ok(PipelineReply::Integer(0));
                };
                let StoredValue::Set(set) = &mut entry.value else {
                    return Err(wrong_type("SREM", &key));
                };
                let removed = members.iter().filter(|m| set.remove(*m)).count();
                if set.is_empty() {
                    entries.remove(&key);
                }
                Ok(PipelineReply::Integer(removed as i64))
            }
        }
    }

    fn live_bytes(&self, operation: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(operation, key)),
        }
    }

    fn live_set(&self, operation: &str, key: &str) -> Result<BTreeSet<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(BTreeSet::new()),
            Some(Entry {
                value: StoredValue::Set(set),
                ..
            }) => Ok(set.clone()),
            Some(_) => Err(wrong_type(operation, key)),
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available("GET")?;
        self.live_bytes("GET", key)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_available("MGET")?;
        // MGET never fails on wrong types, it reports them as missing
        Ok(keys
            .iter()
            .map(|key| self.live_bytes("MGET", key).ok().flatten())
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_available("SET")?;
        let mut entries = self.entries.lock();
        Self::apply(
            &mut entries,
            PipelineOp::Set {
                key: key.to_string(),
                value,
                ttl,
            },
        )?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check_available("DEL")?;
        let mut entries = self.entries.lock();
        let reply = Self::apply(
            &mut entries,
            PipelineOp::Delete {
                keys: keys.to_vec(),
            },
        )?;
        Ok(reply.as_integer().unwrap_or(0) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available("EXISTS")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_if_expired(&mut entries, key, now);
        Ok(entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available("EXPIRE")?;
        let mut entries = self.entries.lock();
        let reply = Self::apply(
            &mut entries,
            PipelineOp::Expire {
                key: key.to_string(),
                ttl,
            },
        )?;
        Ok(reply.as_integer() == Some(1))
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.check_available("TTL")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_if_expired(&mut entries, key, now);
        Ok(match entries.get(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now).as_millis();
                remaining.div_ceil(1_000) as i64
            }
        })
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64> {
        self.check_available("INCRBY")?;
        let mut entries = self.entries.lock();
        let reply = Self::apply(
            &mut entries,
            PipelineOp::IncrBy {
                key: key.to_string(),
                by,
            },
        )?;
        Ok(reply.as_integer().unwrap_or(0))
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_available("SCAN")?;
        let resume_after = match cursor {
            0 => None,
            cursor => match self.scan_cursors.lock().remove(&cursor) {
                Some(last) => Some(last),
                // Unknown or already consumed cursor: iteration is over
                None => return Ok((0, Vec::new())),
            },
        };

        let now = Instant::now();
        let entries = self.entries.lock();
        // Keys deleted between pages cannot shift a key-based cursor
        let mut keys: Vec<&String> = entries
            .iter()
            .filter(|(k, e)| {
                !e.is_expired(now) && resume_after.as_ref().is_none_or(|last| *k > last)
            })
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        let end = count.max(1).min(keys.len());
        let page = keys[..end]
            .iter()
            .filter(|k| glob_match(pattern, k))
            .map(|k| (*k).clone())
            .collect();

        let next = match keys[..end].last() {
            Some(last) if end < keys.len() => {
                let next = self.next_cursor.fetch_add(1, Ordering::SeqCst) + 1;
                self.scan_cursors.lock().insert(next, (*last).clone());
                next
            }
            _ => 0,
        };
        Ok((next, page))
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<Vec<PipelineReply>> {
        self.check_available("PIPELINE")?;
        let mut entries = self.entries.lock();
        ops.into_iter()
            .map(|op| Self::apply(&mut entries, op))
            .collect()
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check_available("SADD")?;
        let mut entries = self.entries.lock();
        let reply = Self::apply(
            &mut entries,
            PipelineOp::SAdd {
                key: key.to_string(),
                members: members.to_vec(),
            },
        )?;
        Ok(reply.as_integer().unwrap_or(0) as u64)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check_available("SREM")?;
        let mut entries = self.entries.lock();
        let reply = Self::apply(
            &mut entries,
            PipelineOp::SRem {
                key: key.to_string(),
                members: members.to_vec(),
            },
        )?;
        Ok(reply.as_integer().unwrap_or(0) as u64)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check_available("SMEMBERS")?;
        Ok(self.live_set("SMEMBERS", key)?.into_iter().collect())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.check_available("SISMEMBER")?;
        Ok(self.live_set("SISMEMBER", key)?.contains(member))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available("PING")
    }
}

/// Glob matching with `*` (any run) and `?` (any single character)
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
