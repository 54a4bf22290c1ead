//! Habit reads and writes on behalf of an authenticated principal.
//!
//! Every committed write invalidates the owner's cached views before the
//! call returns.

use std::sync::Arc;

use time::{Date, OffsetDateTime};
use tracing::info;

use crate::{
    application::{
        error::AppError,
        identity::Principal,
        repos::{CreateHabitParams, HabitsRepo, RecordLogParams},
    },
    cache::Invalidator,
    domain::{
        entities::{HabitId, HabitLogRecord, HabitRecord, UserId},
        error::DomainError,
    },
};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const FREQUENCIES: &[&str] = &["daily", "weekly", "monthly"];

#[derive(Debug, Clone)]
pub struct CreateHabitCommand {
    /// Admins may create habits for another user.
    pub user_id: Option<UserId>,
    pub title: String,
    pub description: String,
    pub frequency: String,
}

#[derive(Debug, Clone)]
pub struct LogHabitCommand {
    pub habit_id: HabitId,
    /// Defaults to today (UTC).
    pub date: Option<Date>,
    pub is_completed: bool,
}

pub struct HabitService {
    repo: Arc<dyn HabitsRepo>,
    invalidator: Invalidator,
}

impl HabitService {
    pub fn new(repo: Arc<dyn HabitsRepo>, invalidator: Invalidator) -> Self {
        Self { repo, invalidator }
    }

    /// Habits of the caller, or of `owner` when an admin asks for them.
    pub async fn list(
        &self,
        principal: Principal,
        owner: Option<UserId>,
    ) -> Result<Vec<HabitRecord>, AppError> {
        let owner = resolve_owner(principal, owner)?;
        Ok(self.repo.list_habits_for_user(owner).await?)
    }

    pub async fn create(
        &self,
        principal: Principal,
        command: CreateHabitCommand,
    ) -> Result<HabitRecord, AppError> {
        let owner = resolve_owner(principal, command.user_id)?;
        let title = command.title.trim().to_string();
        let frequency = command.frequency.trim().to_ascii_lowercase();
        validate_habit(&title, &command.description, &frequency)?;

        let habit = self
            .repo
            .create_habit(CreateHabitParams {
                user_id: owner,
                title,
                description: command.description,
                frequency,
            })
            .await?;

        self.invalidator.after_write(owner).await;
        info!(habit_id = habit.id, user_id = owner, "habit created");
        Ok(habit)
    }

    pub async fn log(
        &self,
        principal: Principal,
        command: LogHabitCommand,
    ) -> Result<HabitLogRecord, AppError> {
        if command.habit_id <= 0 {
            return Err(DomainError::validation("habit_id", "habit_id must be positive").into());
        }
        let habit = self.owned_habit(principal, command.habit_id).await?;
        let date = command
            .date
            .unwrap_or_else(|| OffsetDateTime::now_utc().date());

        let log = self
            .repo
            .record_log(RecordLogParams {
                habit_id: habit.id,
                date,
                is_completed: command.is_completed,
            })
            .await?;

        self.invalidator.after_write(habit.user_id).await;
        info!(
            habit_id = habit.id,
            is_completed = command.is_completed,
            "habit logged"
        );
        Ok(log)
    }

    pub async fn delete(&self, principal: Principal, habit_id: HabitId) -> Result<(), AppError> {
        let habit = self.owned_habit(principal, habit_id).await?;
        self.repo.delete_habit(habit.id).await?;

        self.invalidator.after_write(habit.user_id).await;
        info!(habit_id, user_id = habit.user_id, "habit deleted");
        Ok(())
    }

    async fn owned_habit(
        &self,
        principal: Principal,
        habit_id: HabitId,
    ) -> Result<HabitRecord, AppError> {
        let habit = self
            .repo
            .find_habit(habit_id)
            .await?
            .ok_or(DomainError::not_found("habit", habit_id))?;

        if habit.user_id != principal.user_id && !principal.is_admin() {
            return Err(AppError::Forbidden);
        }
        Ok(habit)
    }
}

fn resolve_owner(principal: Principal, requested: Option<UserId>) -> Result<UserId, AppError> {
    match requested {
        None => Ok(principal.user_id),
        Some(owner) if owner == principal.user_id => Ok(owner),
        Some(_) if !principal.is_admin() => Err(AppError::Forbidden),
        Some(owner) if owner <= 0 => {
            Err(DomainError::validation("user_id", "user_id must be positive").into())
        }
        Some(owner) => Ok(owner),
    }
}

fn validate_habit(title: &str, description: &str, frequency: &str) -> Result<(), DomainError> {
    let title_len = title.chars().count();
    if title_len == 0 || title_len > MAX_TITLE_CHARS {
        return Err(DomainError::validation(
            "title",
            format!("title must be between 1 and {MAX_TITLE_CHARS} characters"),
        ));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(DomainError::validation(
            "description",
            format!("description must be at most {MAX_DESCRIPTION_CHARS} characters"),
        ));
    }
    if !FREQUENCIES.contains(&frequency) {
        return Err(DomainError::validation(
            "frequency",
            format!("frequency must be one of {}", FREQUENCIES.join(", ")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Role;

    fn user(id: UserId) -> Principal {
        Principal {
            user_id: id,
            role: Role::User,
        }
    }

    #[test]
    fn users_only_act_on_themselves() {
        assert_eq!(resolve_owner(user(4), None).unwrap(), 4);
        assert_eq!(resolve_owner(user(4), Some(4)).unwrap(), 4);
        assert!(matches!(
            resolve_owner(user(4), Some(5)),
            Err(AppError::Forbidden)
        ));

        let admin = Principal {
            user_id: 1,
            role: Role::Admin,
        };
        assert_eq!(resolve_owner(admin, Some(5)).unwrap(), 5);
        assert!(resolve_owner(admin, Some(-2)).is_err());
    }

    #[test]
    fn habit_fields_are_bounded() {
        assert!(validate_habit("Read", "", "daily").is_ok());
        assert!(validate_habit("", "", "daily").is_err());
        assert!(validate_habit(&"x".repeat(101), "", "daily").is_err());
        assert!(validate_habit("Read", &"x".repeat(501), "daily").is_err());
        assert!(validate_habit("Read", "", "hourly").is_err());
    }
}
