//! Per-user habit statistics computed by fanning out one task per habit.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    application::repos::{HabitsRepo, RepoError},
    cache::{KeyValueStore, KeyValueStoreExt, keys::stats_key},
    domain::{
        entities::{HabitId, UserId},
        stats::{HabitStat, UserStats},
        streaks::{mean_completion_rate, summarize},
    },
};

const METRIC_STATS_AGGREGATE_MS: &str = "habit_tracker_stats_aggregate_ms";
const METRIC_STATS_TASK_FAILED_TOTAL: &str = "habit_tracker_stats_task_failed_total";
const METRIC_STATS_CACHE_TOTAL: &str = "habit_tracker_stats_cache_total";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to load habits for user {user_id}")]
    LoadHabits {
        user_id: UserId,
        #[source]
        source: RepoError,
    },
    #[error("no habit statistics were computed within {}ms", .0.as_millis())]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Error)]
enum HabitTaskError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("concurrency limiter closed")]
    LimiterClosed,
}

#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub cache_ttl: Duration,
    pub max_concurrency: usize,
    pub deadline: Option<Duration>,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            max_concurrency: 16,
            deadline: Some(Duration::from_secs(5)),
        }
    }
}

pub struct StatsAggregator {
    repo: Arc<dyn HabitsRepo>,
    store: Arc<dyn KeyValueStore>,
    options: StatsOptions,
}

struct FanIn {
    computed: Vec<HabitStat>,
    failed: Vec<HabitId>,
    timed_out: bool,
}

impl StatsAggregator {
    pub fn new(
        repo: Arc<dyn HabitsRepo>,
        store: Arc<dyn KeyValueStore>,
        options: StatsOptions,
    ) -> Self {
        Self {
            repo,
            store,
            options,
        }
    }

    /// Statistics for every habit of `user_id`, served from the shared cache
    /// when a fresh aggregate exists.
    #[instrument(skip(self))]
    pub async fn user_stats(&self, user_id: UserId) -> Result<UserStats, StatsError> {
        let started = Instant::now();
        let key = stats_key(user_id);

        match self.store.get_json::<UserStats>(&key).await {
            Ok(Some(stats)) => {
                debug!(cache = "stats", outcome = "hit", key = %key, "serving cached statistics");
                counter!(METRIC_STATS_CACHE_TOTAL, "outcome" => "hit").increment(1);
                return Ok(stats);
            }
            Ok(None) => {
                counter!(METRIC_STATS_CACHE_TOTAL, "outcome" => "miss").increment(1);
            }
            Err(err) => {
                warn!(cache = "stats", key = %key, error = %err, "statistics cache lookup failed, recomputing");
                counter!(METRIC_STATS_CACHE_TOTAL, "outcome" => "error").increment(1);
            }
        }

        let habits = self
            .repo
            .list_habits_for_user(user_id)
            .await
            .map_err(|source| StatsError::LoadHabits { user_id, source })?;

        if habits.is_empty() {
            let mut stats = UserStats::empty(user_id);
            stats.processing_time_ms = elapsed_ms(started);
            return Ok(stats);
        }

        let habit_ids: Vec<HabitId> = habits.iter().map(|habit| habit.id).collect();
        let fan_in = self.compute(&habit_ids).await;

        if fan_in.timed_out && fan_in.computed.is_empty() {
            warn!(
                user_id,
                habits = habit_ids.len(),
                "statistics deadline exceeded before any habit finished"
            );
            return Err(StatsError::DeadlineExceeded(
                self.options.deadline.unwrap_or_default(),
            ));
        }

        let mut computed = fan_in.computed;
        computed.sort_by_key(|stat| stat.habit_id);

        let stats = UserStats {
            user_id,
            total_habits: count_u32(habits.len()),
            active_habits: count_u32(habits.iter().filter(|habit| habit.is_active).count()),
            overall_completion_rate: mean_completion_rate(&computed),
            habit_stats: computed,
            processing_time_ms: elapsed_ms(started),
            failed_habits: fan_in.failed,
            timed_out: fan_in.timed_out,
        };

        if stats.timed_out {
            debug!(user_id, "partial statistics are not cached");
        } else if let Err(err) = self
            .store
            .set_json(&key, &stats, self.options.cache_ttl)
            .await
        {
            warn!(cache = "stats", key = %key, error = %err, "failed to cache statistics");
        }

        histogram!(METRIC_STATS_AGGREGATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            user_id,
            habits = stats.total_habits,
            computed = stats.habit_stats.len(),
            failed = stats.failed_habits.len(),
            timed_out = stats.timed_out,
            processing_time_ms = stats.processing_time_ms,
            "statistics calculated"
        );

        Ok(stats)
    }

    async fn compute(&self, habit_ids: &[HabitId]) -> FanIn {
        let limiter = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for &habit_id in habit_ids {
            let repo = self.repo.clone();
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let outcome = async {
                    let _permit = limiter
                        .acquire()
                        .await
                        .map_err(|_| HabitTaskError::LimiterClosed)?;
                    let logs = repo.list_logs_for_habit(habit_id).await?;
                    Ok::<_, HabitTaskError>(summarize(
                        habit_id,
                        logs.iter().map(|log| log.is_completed),
                    ))
                }
                .await;
                (habit_id, outcome)
            });
        }

        // A deadline too far out to represent is no deadline.
        let deadline = self
            .options
            .deadline
            .and_then(|limit| Instant::now().checked_add(limit));
        let mut pending: BTreeSet<HabitId> = habit_ids.iter().copied().collect();
        let mut computed = Vec::with_capacity(habit_ids.len());
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(at) => match timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            let Some(joined) = next else {
                break;
            };

            match joined {
                Ok((habit_id, Ok(stat))) => {
                    pending.remove(&habit_id);
                    computed.push(stat);
                }
                Ok((habit_id, Err(err))) => {
                    warn!(habit_id, error = %err, "habit statistics failed");
                    counter!(METRIC_STATS_TASK_FAILED_TOTAL, "reason" => "error").increment(1);
                }
                Err(err) => {
                    warn!(error = %err, "habit statistics task did not complete");
                    counter!(METRIC_STATS_TASK_FAILED_TOTAL, "reason" => "panic").increment(1);
                }
            }
        }

        if timed_out {
            let abandoned = tasks.len();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            warn!(abandoned, "statistics deadline reached, abandoning unfinished habits");
            counter!(METRIC_STATS_TASK_FAILED_TOTAL, "reason" => "deadline")
                .increment(abandoned as u64);
        }

        FanIn {
            computed,
            failed: pending.into_iter().collect(),
            timed_out,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
