//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use super::error::DomainError;

pub type UserId = i64;
pub type HabitId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitRecord {
    pub id: HabitId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub frequency: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitLogRecord {
    pub id: i64,
    pub habit_id: HabitId,
    pub date: Date,
    pub is_completed: bool,
}

/// Role carried by an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::validation(
                "role",
                format!("unknown role `{other}`"),
            )),
        }
    }
}
