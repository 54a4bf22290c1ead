//! Targeted and bulk removal of cached entries after writes.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use super::keys::{
    HABIT_LIST_PATHS, PrincipalKey, RESPONSE_PREFIX, STATS_PREFIX, owner_prefix, prefix_pattern,
    response_prefix, stats_key,
};
use super::store::{KeyValueStore, StoreError};
use crate::domain::entities::UserId;

const METRIC_INVALIDATED_KEYS_TOTAL: &str = "habit_tracker_cache_invalidated_keys_total";

#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn KeyValueStore>,
}

impl Invalidator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn invalidate_key(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await?;
        counter!(METRIC_INVALIDATED_KEYS_TOTAL, "scope" => "key").increment(1);
        debug!(key, "invalidated cache key");
        Ok(())
    }

    /// Delete every key starting with `prefix`; glob characters in the prefix
    /// are matched literally.
    pub async fn invalidate_pattern(&self, prefix: &str) -> Result<u64, StoreError> {
        let deleted = self.store.delete_by_pattern(&prefix_pattern(prefix)).await?;
        counter!(METRIC_INVALIDATED_KEYS_TOTAL, "scope" => "pattern").increment(deleted);
        debug!(prefix, deleted, "invalidated cache prefix");
        Ok(deleted)
    }

    /// Drop the views derived from an owner's habits: the statistics aggregate
    /// and every cached variant of the habit list routes.
    pub async fn invalidate_owner(&self, owner: UserId) -> Result<u64, StoreError> {
        self.invalidate_key(&stats_key(owner)).await?;

        let mut deleted = 1;
        for path in HABIT_LIST_PATHS {
            // `?` terminates the path so `/api/habits` does not also match
            // `/api/habitsfoo`.
            let prefix = format!("{}?", response_prefix(PrincipalKey::User(owner), path));
            deleted += self.invalidate_pattern(&prefix).await?;
        }
        Ok(deleted)
    }

    /// Write-path variant: failures are logged and the write stands.
    pub async fn after_write(&self, owner: UserId) {
        if let Err(err) = self.invalidate_owner(owner).await {
            warn!(
                user_id = owner,
                error = %err,
                "cache invalidation failed after write; entries expire with their TTL"
            );
        }
    }

    /// Remove every cached response and the statistics aggregate of `owner`.
    pub async fn flush_owner(&self, owner: UserId) -> Result<u64, StoreError> {
        let mut deleted = self
            .invalidate_pattern(&owner_prefix(PrincipalKey::User(owner)))
            .await?;
        self.invalidate_key(&stats_key(owner)).await?;
        deleted += 1;
        info!(user_id = owner, deleted, "flushed owner cache");
        Ok(deleted)
    }

    /// Remove every cached response and statistics aggregate. Rate counters
    /// are left alone.
    pub async fn flush_all(&self) -> Result<u64, StoreError> {
        let responses = self
            .invalidate_pattern(&format!("{RESPONSE_PREFIX}:"))
            .await?;
        let stats = self.invalidate_pattern(&format!("{STATS_PREFIX}:")).await?;
        info!(responses, stats, "flushed all cache entries");
        Ok(responses + stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys::rate_key, keys::response_key, memory::MemoryStore};
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    async fn seeded() -> (Arc<MemoryStore>, Invalidator) {
        let store = Arc::new(MemoryStore::new());
        for key in [
            response_key(PrincipalKey::User(1), "/api/habits", None),
            response_key(PrincipalKey::User(1), "/api/habits", Some("page=2")),
            response_key(PrincipalKey::User(1), "/api/profile", None),
            response_key(PrincipalKey::User(11), "/api/habits", None),
            response_key(PrincipalKey::Anonymous, "/health", None),
            stats_key(1),
            stats_key(11),
            rate_key("10.0.0.1"),
        ] {
            store.set(&key, b"x", TTL).await.unwrap();
        }
        let invalidator = Invalidator::new(store.clone());
        (store, invalidator)
    }

    async fn exists(store: &MemoryStore, key: &str) -> bool {
        store.get(key).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn owner_invalidation_spares_other_users() {
        let (store, invalidator) = seeded().await;

        invalidator.invalidate_owner(1).await.unwrap();

        assert!(!exists(&store, &stats_key(1)).await);
        assert!(!exists(&store, &response_key(PrincipalKey::User(1), "/api/habits", None)).await);
        assert!(
            !exists(
                &store,
                &response_key(PrincipalKey::User(1), "/api/habits", Some("page=2"))
            )
            .await
        );
        assert!(exists(&store, &response_key(PrincipalKey::User(1), "/api/profile", None)).await);
        assert!(exists(&store, &response_key(PrincipalKey::User(11), "/api/habits", None)).await);
        assert!(exists(&store, &stats_key(11)).await);
    }

    #[tokio::test]
    async fn pattern_invalidation_removes_prefix_only() {
        let (store, invalidator) = seeded().await;

        let deleted = invalidator.invalidate_pattern("cache:1:").await.unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(store.len(), 5);
        assert!(exists(&store, &response_key(PrincipalKey::User(11), "/api/habits", None)).await);
    }

    #[tokio::test]
    async fn flush_owner_removes_every_entry_of_owner() {
        let (store, invalidator) = seeded().await;

        invalidator.flush_owner(1).await.unwrap();

        assert!(!exists(&store, &response_key(PrincipalKey::User(1), "/api/profile", None)).await);
        assert!(!exists(&store, &stats_key(1)).await);
        assert!(exists(&store, &stats_key(11)).await);
    }

    #[tokio::test]
    async fn flush_all_keeps_rate_counters() {
        let (store, invalidator) = seeded().await;

        let deleted = invalidator.flush_all().await.unwrap();

        assert_eq!(deleted, 7);
        assert_eq!(store.len(), 1);
        assert!(exists(&store, &rate_key("10.0.0.1")).await);
    }
}
