#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::{Date, OffsetDateTime, macros::date};
use tokio::sync::Mutex;

use habit_tracker::application::repos::{
    CreateHabitParams, HabitsRepo, RecordLogParams, RepoError,
};
use habit_tracker::cache::{KeyValueStore, StoreError};
use habit_tracker::domain::entities::{HabitId, HabitLogRecord, HabitRecord, UserId};

const FIRST_DAY: Date = date!(2025 - 01 - 01);

/// In-memory habits repository with switches for failing and hanging log loads.
#[derive(Default)]
pub struct FakeHabitsRepo {
    habits: Mutex<BTreeMap<HabitId, HabitRecord>>,
    logs: Mutex<BTreeMap<HabitId, Vec<HabitLogRecord>>>,
    failing: Mutex<HashSet<HabitId>>,
    hanging: Mutex<HashSet<HabitId>>,
    next_id: AtomicI64,
    log_loads: AtomicUsize,
    habit_loads: AtomicUsize,
    fail_habit_loads: Mutex<bool>,
}

impl FakeHabitsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn seed_habit(&self, user_id: UserId, title: &str, is_active: bool) -> HabitId {
        let id = self.next_id();
        self.habits.lock().await.insert(
            id,
            HabitRecord {
                id,
                user_id,
                title: title.to_string(),
                description: String::new(),
                frequency: "daily".to_string(),
                is_active,
                created_at: OffsetDateTime::UNIX_EPOCH,
            },
        );
        id
    }

    /// Seed completion flags ordered oldest day first.
    pub async fn seed_logs(&self, habit_id: HabitId, completions_oldest_first: &[bool]) {
        let mut logs = self.logs.lock().await;
        let entries = logs.entry(habit_id).or_default();
        for (offset, is_completed) in completions_oldest_first.iter().enumerate() {
            entries.push(HabitLogRecord {
                id: self.next_id(),
                habit_id,
                date: FIRST_DAY + time::Duration::days(offset as i64),
                is_completed: *is_completed,
            });
        }
    }

    pub async fn fail_logs_for(&self, habit_id: HabitId) {
        self.failing.lock().await.insert(habit_id);
    }

    pub async fn hang_logs_for(&self, habit_id: HabitId) {
        self.hanging.lock().await.insert(habit_id);
    }

    pub async fn fail_habit_loads(&self) {
        *self.fail_habit_loads.lock().await = true;
    }

    pub fn log_loads(&self) -> usize {
        self.log_loads.load(Ordering::SeqCst)
    }

    pub fn habit_loads(&self) -> usize {
        self.habit_loads.load(Ordering::SeqCst)
    }

    pub async fn habit(&self, habit_id: HabitId) -> Option<HabitRecord> {
        self.habits.lock().await.get(&habit_id).cloned()
    }
}

#[async_trait]
impl HabitsRepo for FakeHabitsRepo {
    async fn list_habits_for_user(&self, user_id: UserId) -> Result<Vec<HabitRecord>, RepoError> {
        self.habit_loads.fetch_add(1, Ordering::SeqCst);
        if *self.fail_habit_loads.lock().await {
            return Err(RepoError::Persistence("connection reset".to_string()));
        }
        Ok(self
            .habits
            .lock()
            .await
            .values()
            .filter(|habit| habit.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_logs_for_habit(
        &self,
        habit_id: HabitId,
    ) -> Result<Vec<HabitLogRecord>, RepoError> {
        self.log_loads.fetch_add(1, Ordering::SeqCst);
        if self.hanging.lock().await.contains(&habit_id) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().await.contains(&habit_id) {
            return Err(RepoError::Persistence(format!(
                "logs for habit {habit_id} unavailable"
            )));
        }

        let mut logs = self
            .logs
            .lock()
            .await
            .get(&habit_id)
            .cloned()
            .unwrap_or_default();
        logs.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(logs)
    }

    async fn find_habit(&self, habit_id: HabitId) -> Result<Option<HabitRecord>, RepoError> {
        Ok(self.habits.lock().await.get(&habit_id).cloned())
    }

    async fn create_habit(&self, params: CreateHabitParams) -> Result<HabitRecord, RepoError> {
        let id = self.next_id();
        let record = HabitRecord {
            id,
            user_id: params.user_id,
            title: params.title,
            description: params.description,
            frequency: params.frequency,
            is_active: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        self.habits.lock().await.insert(id, record.clone());
        Ok(record)
    }

    async fn record_log(&self, params: RecordLogParams) -> Result<HabitLogRecord, RepoError> {
        if !self.habits.lock().await.contains_key(&params.habit_id) {
            return Err(RepoError::NotFound);
        }
        let mut logs = self.logs.lock().await;
        let entries = logs.entry(params.habit_id).or_default();
        entries.retain(|log| log.date != params.date);
        let record = HabitLogRecord {
            id: self.next_id(),
            habit_id: params.habit_id,
            date: params.date,
            is_completed: params.is_completed,
        };
        entries.push(record.clone());
        Ok(record)
    }

    async fn delete_habit(&self, habit_id: HabitId) -> Result<(), RepoError> {
        self.logs.lock().await.remove(&habit_id);
        self.habits
            .lock()
            .await
            .remove(&habit_id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn set_habit_active(&self, habit_id: HabitId, active: bool) -> Result<UserId, RepoError> {
        let mut habits = self.habits.lock().await;
        let habit = habits.get_mut(&habit_id).ok_or(RepoError::NotFound)?;
        habit.is_active = active;
        Ok(habit.user_id)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Store whose every operation fails as if the server were unreachable.
pub struct UnreachableStore;

#[async_trait]
impl KeyValueStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }

    async fn increment_with_ttl(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Transport("connection refused".to_string()))
    }
}
