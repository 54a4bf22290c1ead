mod support;

use std::sync::Arc;
use std::time::Duration;

use habit_tracker::application::stats::{StatsAggregator, StatsError, StatsOptions};
use habit_tracker::cache::{KeyValueStore, MemoryStore, keys::stats_key};
use habit_tracker::domain::stats::UserStats;

use support::{FakeHabitsRepo, UnreachableStore};

fn aggregator(
    repo: Arc<FakeHabitsRepo>,
    store: Arc<dyn KeyValueStore>,
    deadline: Option<Duration>,
) -> StatsAggregator {
    StatsAggregator::new(
        repo,
        store,
        StatsOptions {
            cache_ttl: Duration::from_secs(300),
            max_concurrency: 4,
            deadline,
        },
    )
}

#[tokio::test]
async fn failing_habit_is_excluded_from_the_mean() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let user = 7;
    let perfect = repo.seed_habit(user, "Read", true).await;
    let mixed = repo.seed_habit(user, "Run", true).await;
    let broken = repo.seed_habit(user, "Write", true).await;
    let untouched = repo.seed_habit(user, "Stretch", false).await;
    let lapsed = repo.seed_habit(user, "Meditate", true).await;

    repo.seed_logs(perfect, &[true, true, true]).await;
    // Most recent first this reads false, true, true, false, true.
    repo.seed_logs(mixed, &[true, false, true, true, false]).await;
    repo.seed_logs(broken, &[true]).await;
    repo.seed_logs(lapsed, &[true, false]).await;
    repo.fail_logs_for(broken).await;

    let store = Arc::new(MemoryStore::new());
    let stats = aggregator(repo.clone(), store.clone(), None)
        .user_stats(user)
        .await
        .expect("partial failure still yields statistics");

    assert_eq!(stats.total_habits, 5);
    assert_eq!(stats.active_habits, 4);
    assert_eq!(stats.failed_habits, vec![broken]);
    assert!(!stats.timed_out);

    let ids: Vec<_> = stats.habit_stats.iter().map(|stat| stat.habit_id).collect();
    assert_eq!(ids, vec![perfect, mixed, untouched, lapsed]);

    let mixed_stat = &stats.habit_stats[1];
    assert_eq!(mixed_stat.total_logs, 5);
    assert_eq!(mixed_stat.completed_logs, 3);
    assert_eq!(mixed_stat.current_streak, 0);
    assert_eq!(mixed_stat.longest_streak, 2);
    assert!((mixed_stat.completion_rate - 60.0).abs() < 1e-9);

    let perfect_stat = &stats.habit_stats[0];
    assert_eq!(perfect_stat.current_streak, 3);
    assert_eq!(perfect_stat.longest_streak, 3);

    let empty_stat = &stats.habit_stats[2];
    assert_eq!(empty_stat.total_logs, 0);
    assert_eq!(empty_stat.completion_rate, 0.0);

    // (100 + 60 + 0 + 50) / 4
    assert!((stats.overall_completion_rate - 52.5).abs() < 1e-9);
}

#[tokio::test]
async fn second_read_is_served_from_the_cache() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let habit = repo.seed_habit(3, "Read", true).await;
    repo.seed_logs(habit, &[true, true]).await;

    let store = Arc::new(MemoryStore::new());
    let stats = aggregator(repo.clone(), store.clone(), None);

    let first = stats.user_stats(3).await.expect("first read");
    let loads_after_first = repo.log_loads();
    let second = stats.user_stats(3).await.expect("second read");

    assert_eq!(repo.log_loads(), loads_after_first);
    assert_eq!(repo.habit_loads(), 1);
    assert_eq!(first.habit_stats, second.habit_stats);

    let cached = store
        .get(&stats_key(3))
        .await
        .expect("store reachable")
        .expect("aggregate cached");
    let decoded: UserStats = serde_json::from_slice(&cached).expect("valid json");
    assert_eq!(decoded.user_id, 3);
}

#[tokio::test]
async fn user_without_habits_gets_zeroed_stats_without_caching() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let store = Arc::new(MemoryStore::new());

    let stats = aggregator(repo.clone(), store.clone(), None)
        .user_stats(11)
        .await
        .expect("empty stats");

    assert_eq!(stats.total_habits, 0);
    assert!(stats.habit_stats.is_empty());
    assert_eq!(stats.overall_completion_rate, 0.0);
    assert_eq!(repo.log_loads(), 0);
    assert!(store.get(&stats_key(11)).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn hung_habit_is_abandoned_at_the_deadline() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let quick = repo.seed_habit(5, "Read", true).await;
    let stuck = repo.seed_habit(5, "Run", true).await;
    repo.seed_logs(quick, &[true]).await;
    repo.hang_logs_for(stuck).await;

    let store = Arc::new(MemoryStore::new());
    let stats = aggregator(repo, store.clone(), Some(Duration::from_millis(200)))
        .user_stats(5)
        .await
        .expect("partial result");

    assert!(stats.timed_out);
    assert_eq!(stats.failed_habits, vec![stuck]);
    assert_eq!(stats.habit_stats.len(), 1);
    assert_eq!(stats.habit_stats[0].habit_id, quick);
    assert!(
        store.get(&stats_key(5)).await.unwrap().is_none(),
        "partial aggregates must not be cached"
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_without_any_result_is_an_error() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let stuck = repo.seed_habit(9, "Run", true).await;
    repo.hang_logs_for(stuck).await;

    let err = aggregator(
        repo,
        Arc::new(MemoryStore::new()),
        Some(Duration::from_millis(50)),
    )
    .user_stats(9)
    .await
    .expect_err("nothing computed");

    assert!(matches!(err, StatsError::DeadlineExceeded(limit) if limit == Duration::from_millis(50)));
}

#[tokio::test]
async fn habit_load_failure_is_fatal() {
    let repo = Arc::new(FakeHabitsRepo::new());
    repo.seed_habit(2, "Read", true).await;
    repo.fail_habit_loads().await;

    let err = aggregator(repo, Arc::new(MemoryStore::new()), None)
        .user_stats(2)
        .await
        .expect_err("habit set unavailable");

    assert!(matches!(err, StatsError::LoadHabits { user_id: 2, .. }));
}

#[tokio::test]
async fn unreachable_store_degrades_to_recomputation() {
    let repo = Arc::new(FakeHabitsRepo::new());
    let habit = repo.seed_habit(4, "Read", true).await;
    repo.seed_logs(habit, &[true, false, true]).await;

    let stats = aggregator(repo.clone(), Arc::new(UnreachableStore), None);
    let first = stats.user_stats(4).await.expect("computed without cache");
    let second = stats.user_stats(4).await.expect("computed again");

    assert_eq!(first.habit_stats, second.habit_stats);
    assert_eq!(repo.habit_loads(), 2);
}
