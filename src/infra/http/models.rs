use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::application::notifications::NotificationJob;
use crate::application::workers::{DispatchReport, JobOutcome};
use crate::domain::entities::{HabitId, HabitLogRecord, HabitRecord, UserId};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

fn default_frequency() -> String {
    "daily".to_string()
}

fn default_completed() -> bool {
    true
}

fn default_activate() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct HabitListQuery {
    /// Admin only: list another user's habits.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HabitCreateRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_frequency")]
    pub frequency: String,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HabitLogRequest {
    pub habit_id: HabitId,
    /// `YYYY-MM-DD`; today when absent.
    pub date: Option<String>,
    #[serde(default = "default_completed")]
    pub is_completed: bool,
}

impl HabitLogRequest {
    pub fn parsed_date(&self) -> Result<Option<Date>, time::error::Parse> {
        self.date
            .as_deref()
            .map(|raw| Date::parse(raw.trim(), DATE_FORMAT))
            .transpose()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BulkActivateRequest {
    pub habit_ids: Vec<HabitId>,
    #[serde(default = "default_activate")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NotificationRequest {
    pub jobs: Vec<NotificationJob>,
}

#[derive(Debug, Serialize)]
pub struct HabitResponse {
    pub id: HabitId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub frequency: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<HabitRecord> for HabitResponse {
    fn from(record: HabitRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            title: record.title,
            description: record.description,
            frequency: record.frequency,
            is_active: record.is_active,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HabitLogResponse {
    pub id: i64,
    pub habit_id: HabitId,
    pub date: String,
    pub is_completed: bool,
}

impl From<HabitLogRecord> for HabitLogResponse {
    fn from(record: HabitLogRecord) -> Self {
        Self {
            id: record.id,
            habit_id: record.habit_id,
            date: record
                .date
                .format(DATE_FORMAT)
                .unwrap_or_else(|_| record.date.to_string()),
            is_completed: record.is_completed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationOutcome {
    pub user_id: UserId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: bool,
    pub results: Vec<NotificationOutcome>,
}

impl NotificationResponse {
    pub fn from_report(jobs: &[NotificationJob], report: DispatchReport<()>) -> Self {
        let sent = report.succeeded();
        let failed = report.failed();
        let cancelled = report.cancelled();
        let results = jobs
            .iter()
            .zip(report.outcomes)
            .map(|(job, outcome)| {
                let status = outcome.label();
                let error = match outcome {
                    JobOutcome::Failed(message) => Some(message),
                    _ => None,
                };
                NotificationOutcome {
                    user_id: job.user_id,
                    status,
                    error,
                }
            })
            .collect();

        Self {
            sent,
            failed,
            cancelled,
            timed_out: report.timed_out,
            results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub store: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn log_request_defaults_to_completed_today() {
        let request: HabitLogRequest =
            serde_json::from_str(r#"{"habit_id": 3}"#).expect("valid payload");
        assert!(request.is_completed);
        assert_eq!(request.parsed_date().unwrap(), None);
    }

    #[test]
    fn log_request_parses_calendar_dates() {
        let request: HabitLogRequest =
            serde_json::from_str(r#"{"habit_id": 3, "date": "2025-03-09", "is_completed": false}"#)
                .expect("valid payload");
        assert_eq!(request.parsed_date().unwrap(), Some(date!(2025 - 03 - 09)));

        let bad = HabitLogRequest {
            habit_id: 3,
            date: Some("09/03/2025".to_string()),
            is_completed: true,
        };
        assert!(bad.parsed_date().is_err());
    }
}
