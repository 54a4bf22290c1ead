use std::{sync::Arc, time::Duration};

use crate::application::bulk::BulkActivationService;
use crate::application::habits::HabitService;
use crate::application::notifications::{NotificationService, Notifier};
use crate::application::repos::HabitsRepo;
use crate::application::stats::{StatsAggregator, StatsOptions};
use crate::application::workers::WorkerPool;
use crate::cache::{CacheConfig, Invalidator, KeyValueStore, RateLimiter, ResponseCacheState};
use crate::config::Settings;

/// How the rate-limit middleware identifies and meters callers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub trust_forwarded: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn HabitsRepo>,
    pub store: Arc<dyn KeyValueStore>,
    pub invalidator: Invalidator,
    pub habits: Arc<HabitService>,
    pub stats: Arc<StatsAggregator>,
    pub notifications: Arc<NotificationService>,
    pub bulk: Arc<BulkActivationService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit: RateLimitPolicy,
    pub response_cache: ResponseCacheState,
}

impl AppState {
    /// Wire every service around one repository, one shared store and one
    /// notification channel.
    pub fn new(
        settings: &Settings,
        repo: Arc<dyn HabitsRepo>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = CacheConfig::from(&settings.cache);
        let invalidator = Invalidator::new(store.clone());

        let stats = StatsAggregator::new(
            repo.clone(),
            store.clone(),
            StatsOptions {
                cache_ttl: cache.stats_ttl(),
                max_concurrency: settings.stats.max_concurrency.get() as usize,
                deadline: settings.stats.deadline,
            },
        );

        let notification_pool = WorkerPool::new(
            settings.workers.notification_workers.get() as usize,
            settings.workers.deadline,
        );
        let bulk_pool = WorkerPool::new(
            settings.workers.bulk_workers.get() as usize,
            settings.workers.deadline,
        );

        let rate_limiter = RateLimiter::new(
            store.clone(),
            settings.rate_limit.max_requests.get(),
            Duration::from_secs(u64::from(settings.rate_limit.window_seconds.get())),
        );

        let mut response_cache =
            ResponseCacheState::new(store.clone(), cache.response_ttl(), cache.max_body_bytes);
        if !cache.enabled {
            response_cache = response_cache.disabled();
        }

        Self {
            repo: repo.clone(),
            store,
            invalidator: invalidator.clone(),
            habits: Arc::new(HabitService::new(repo.clone(), invalidator.clone())),
            stats: Arc::new(stats),
            notifications: Arc::new(NotificationService::new(notifier, notification_pool)),
            bulk: Arc::new(BulkActivationService::new(repo, invalidator, bulk_pool)),
            rate_limiter: Arc::new(rate_limiter),
            rate_limit: RateLimitPolicy {
                enabled: settings.rate_limit.enabled,
                trust_forwarded: settings.rate_limit.trust_forwarded,
            },
            response_cache,
        }
    }
}
