//! Fan-out delivery of user notifications through the worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    application::workers::{DispatchReport, WorkerPool},
    domain::{entities::UserId, error::DomainError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    StreakMilestone,
    WeeklySummary,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::StreakMilestone => "streak_milestone",
            NotificationKind::WeeklySummary => "weekly_summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub user_id: UserId,
    pub message: String,
    pub kind: NotificationKind,
}

impl NotificationJob {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id <= 0 {
            return Err(DomainError::validation("user_id", "user_id must be positive"));
        }
        if self.message.trim().is_empty() {
            return Err(DomainError::validation("message", "message must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivery channel for a single notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, job: &NotificationJob) -> Result<(), NotifyError>;
}

/// Notifier that records deliveries in the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, job: &NotificationJob) -> Result<(), NotifyError> {
        info!(
            user_id = job.user_id,
            kind = job.kind.as_str(),
            "notification sent"
        );
        Ok(())
    }
}

pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    pool: WorkerPool,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>, pool: WorkerPool) -> Self {
        Self { notifier, pool }
    }

    /// Validate every job up front, then deliver them concurrently.
    pub async fn dispatch(
        &self,
        jobs: Vec<NotificationJob>,
    ) -> Result<DispatchReport<()>, DomainError> {
        for job in &jobs {
            job.validate()?;
        }

        let notifier = self.notifier.clone();
        Ok(self
            .pool
            .dispatch("notifications", jobs, move |job| {
                let notifier = notifier.clone();
                async move { notifier.send(&job).await }
            })
            .await)
    }
}
