//! Process-local [`KeyValueStore`] used for single-instance deployments and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;
use tracing::debug;

use super::keys::glob_match;
use super::store::{KeyValueStore, SCAN_BATCH, StoreError};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

/// A lifetime too long to represent never expires.
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining lifetime of `key`, `None` when absent or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        let deadline = entry.expires_at?;
        (deadline > now).then(|| deadline - now)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Count a write and sweep expired entries every [`SWEEP_EVERY`] writes.
    /// Must not be called while a shard guard is held.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "swept expired in-process store entries");
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.to_vec()));
            }
        } else {
            return Ok(None);
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: Bytes::copy_from_slice(value),
                expires_at: expiry(Instant::now(), ttl),
            },
        );
        self.record_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut deleted = 0u64;
        for batch in matching.chunks(SCAN_BATCH) {
            for key in batch {
                if self.entries.remove(key).is_some() {
                    deleted += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(deleted)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let fresh = || MemoryEntry {
            value: Bytes::from_static(b"1"),
            expires_at: expiry(now, ttl),
        };

        // The shard lock held by `entry` makes read-modify-write atomic.
        let count = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(1)
            }
            Entry::Occupied(mut occupied) if occupied.get().is_expired(now) => {
                occupied.insert(fresh());
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                let current: u64 = std::str::from_utf8(&occupied.get().value)
                    .ok()
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(|| {
                        StoreError::Protocol(format!("value at `{key}` is not an integer"))
                    })?;
                let next = current + 1;
                let entry = occupied.get_mut();
                entry.value = Bytes::from(next.to_string());
                if entry.expires_at.is_none() {
                    entry.expires_at = expiry(now, ttl);
                }
                Ok(next)
            }
        };
        self.record_write();
        count
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::KeyValueStoreExt;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Duration::from_secs(10))
            .await
            .expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn counter_ttl_is_set_once() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.increment_with_ttl("rate:a", window).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment_with_ttl("rate:a", window).await.unwrap(), 2);

        // Second increment did not push the window out.
        let remaining = store.ttl("rate:a").expect("ttl");
        assert!(remaining <= Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.increment_with_ttl("rate:a", window).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_swept_by_later_writes() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        for client in 0..10_000 {
            store
                .increment_with_ttl(&format!("rate:10.0.{client}"), window)
                .await
                .unwrap();
        }
        assert_eq!(store.entries.len(), 10_000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..SWEEP_EVERY {
            store.set("cache:1:/api/habits?", b"x", window).await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::MAX).await.unwrap();
        assert_eq!(store.ttl("k"), None);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn increment_rejects_non_integer_values() {
        let store = MemoryStore::new();
        store
            .set("rate:b", b"not-a-number", Duration::from_secs(5))
            .await
            .unwrap();
        let err = store
            .increment_with_ttl("rate:b", Duration::from_secs(5))
            .await
            .expect_err("non-integer");
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn pattern_delete_leaves_unrelated_keys() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        for idx in 0..250 {
            store
                .set(&format!("cache:1:/api/habits?page={idx}"), b"x", ttl)
                .await
                .unwrap();
        }
        store.set("cache:2:/api/habits?", b"x", ttl).await.unwrap();
        store.set("user_stats:1", b"x", ttl).await.unwrap();

        let deleted = store.delete_by_pattern("cache:1:*").await.unwrap();
        assert_eq!(deleted, 250);
        assert!(store.get("cache:2:/api/habits?").await.unwrap().is_some());
        assert!(store.get("user_stats:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = MemoryStore::new();
        store
            .set_json("json", &vec![1u8, 2, 3], Duration::from_secs(5))
            .await
            .unwrap();
        let value: Option<Vec<u8>> = store.get_json("json").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
