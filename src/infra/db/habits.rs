use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::{
    application::repos::{CreateHabitParams, HabitsRepo, RecordLogParams, RepoError},
    domain::entities::{HabitId, HabitLogRecord, HabitRecord, UserId},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct HabitRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    frequency: String,
    is_active: bool,
    created_at: OffsetDateTime,
}

impl From<HabitRow> for HabitRecord {
    fn from(row: HabitRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            frequency: row.frequency,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HabitLogRow {
    id: i64,
    habit_id: i64,
    date: Date,
    is_completed: bool,
}

impl From<HabitLogRow> for HabitLogRecord {
    fn from(row: HabitLogRow) -> Self {
        Self {
            id: row.id,
            habit_id: row.habit_id,
            date: row.date,
            is_completed: row.is_completed,
        }
    }
}

#[async_trait]
impl HabitsRepo for PostgresRepositories {
    async fn list_habits_for_user(&self, user_id: UserId) -> Result<Vec<HabitRecord>, RepoError> {
        let rows = sqlx::query_as::<_, HabitRow>(
            r#"
            SELECT id, user_id, title, description, frequency, is_active, created_at
            FROM habits
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(HabitRecord::from).collect())
    }

    async fn list_logs_for_habit(
        &self,
        habit_id: HabitId,
    ) -> Result<Vec<HabitLogRecord>, RepoError> {
        let rows = sqlx::query_as::<_, HabitLogRow>(
            r#"
            SELECT id, habit_id, date, is_completed
            FROM habit_logs
            WHERE habit_id = $1
            ORDER BY date DESC
            "#,
        )
        .bind(habit_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(HabitLogRecord::from).collect())
    }

    async fn find_habit(&self, habit_id: HabitId) -> Result<Option<HabitRecord>, RepoError> {
        let row = sqlx::query_as::<_, HabitRow>(
            r#"
            SELECT id, user_id, title, description, frequency, is_active, created_at
            FROM habits
            WHERE id = $1
            "#,
        )
        .bind(habit_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(HabitRecord::from))
    }

    async fn create_habit(&self, params: CreateHabitParams) -> Result<HabitRecord, RepoError> {
        let row = sqlx::query_as::<_, HabitRow>(
            r#"
            INSERT INTO habits (user_id, title, description, frequency)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, description, frequency, is_active, created_at
            "#,
        )
        .bind(params.user_id)
        .bind(&params.title)
        .bind(&params.description)
        .bind(&params.frequency)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn record_log(&self, params: RecordLogParams) -> Result<HabitLogRecord, RepoError> {
        let row = sqlx::query_as::<_, HabitLogRow>(
            r#"
            INSERT INTO habit_logs (habit_id, date, is_completed)
            VALUES ($1, $2, $3)
            ON CONFLICT (habit_id, date)
            DO UPDATE SET is_completed = EXCLUDED.is_completed
            RETURNING id, habit_id, date, is_completed
            "#,
        )
        .bind(params.habit_id)
        .bind(params.date)
        .bind(params.is_completed)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn delete_habit(&self, habit_id: HabitId) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let logs = sqlx::query("DELETE FROM habit_logs WHERE habit_id = $1")
            .bind(habit_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        let habits = sqlx::query("DELETE FROM habits WHERE id = $1")
            .bind(habit_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        // Dropping `tx` without commit rolls the log deletion back.
        if habits == 0 {
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(habit_id, logs, "habit deleted");
        Ok(())
    }

    async fn set_habit_active(
        &self,
        habit_id: HabitId,
        active: bool,
    ) -> Result<UserId, RepoError> {
        let owner: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE habits
            SET is_active = $2, updated_at = now()
            WHERE id = $1
            RETURNING user_id
            "#,
        )
        .bind(habit_id)
        .bind(active)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        owner.ok_or(RepoError::NotFound)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}
