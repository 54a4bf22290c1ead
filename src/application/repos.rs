//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::Date;

use crate::domain::entities::{HabitId, HabitLogRecord, HabitRecord, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateHabitParams {
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub frequency: String,
}

#[derive(Debug, Clone)]
pub struct RecordLogParams {
    pub habit_id: HabitId,
    pub date: Date,
    pub is_completed: bool,
}

#[async_trait]
pub trait HabitsRepo: Send + Sync {
    /// Every habit owned by `user_id`, active or not.
    async fn list_habits_for_user(&self, user_id: UserId) -> Result<Vec<HabitRecord>, RepoError>;

    /// Logs of `habit_id`, most recent date first.
    async fn list_logs_for_habit(&self, habit_id: HabitId)
    -> Result<Vec<HabitLogRecord>, RepoError>;

    async fn find_habit(&self, habit_id: HabitId) -> Result<Option<HabitRecord>, RepoError>;

    async fn create_habit(&self, params: CreateHabitParams) -> Result<HabitRecord, RepoError>;

    /// Insert or replace the log of a habit for one date.
    async fn record_log(&self, params: RecordLogParams) -> Result<HabitLogRecord, RepoError>;

    /// Delete a habit together with its logs in one transaction.
    async fn delete_habit(&self, habit_id: HabitId) -> Result<(), RepoError>;

    /// Returns the owner of the updated habit.
    async fn set_habit_active(&self, habit_id: HabitId, active: bool)
    -> Result<UserId, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}
