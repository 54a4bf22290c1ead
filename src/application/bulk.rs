//! Bulk activation and deactivation of habits.

use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    application::{
        repos::HabitsRepo,
        workers::{JobOutcome, WorkerPool},
    },
    cache::Invalidator,
    domain::{
        entities::{HabitId, UserId},
        error::DomainError,
    },
};

/// Upper bound on habit ids accepted in one request.
pub const MAX_BULK_IDS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    pub habit_id: HabitId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkActivationReport {
    pub is_active: bool,
    pub updated: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkActivationReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

pub struct BulkActivationService {
    repo: Arc<dyn HabitsRepo>,
    invalidator: Invalidator,
    pool: WorkerPool,
}

impl BulkActivationService {
    pub fn new(repo: Arc<dyn HabitsRepo>, invalidator: Invalidator, pool: WorkerPool) -> Self {
        Self {
            repo,
            invalidator,
            pool,
        }
    }

    /// Set `is_active` on every listed habit. Each habit is updated by exactly
    /// one worker; owners of updated habits are invalidated once after all
    /// workers have finished.
    pub async fn set_active(
        &self,
        habit_ids: Vec<HabitId>,
        is_active: bool,
    ) -> Result<BulkActivationReport, DomainError> {
        let unique: Vec<HabitId> = habit_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.len() > MAX_BULK_IDS {
            return Err(DomainError::validation(
                "habit_ids",
                format!("at most {MAX_BULK_IDS} habit ids per request"),
            ));
        }
        if let Some(invalid) = unique.iter().find(|id| **id <= 0) {
            return Err(DomainError::validation(
                "habit_ids",
                format!("habit id {invalid} is not valid"),
            ));
        }

        let repo = self.repo.clone();
        let report = self
            .pool
            .dispatch("bulk_activation", unique.clone(), move |habit_id| {
                let repo = repo.clone();
                async move { repo.set_habit_active(habit_id, is_active).await }
            })
            .await;

        let mut owners: BTreeSet<UserId> = BTreeSet::new();
        let mut results = Vec::with_capacity(unique.len());
        for (habit_id, outcome) in unique.iter().copied().zip(report.outcomes.iter()) {
            let error = match outcome {
                JobOutcome::Succeeded(owner) => {
                    owners.insert(*owner);
                    None
                }
                JobOutcome::Failed(message) => {
                    warn!(habit_id, error = %message, "bulk activation failed for habit");
                    Some(message.clone())
                }
                JobOutcome::Cancelled => Some("not processed before the deadline".to_string()),
            };
            results.push(BulkItemResult {
                habit_id,
                status: outcome.label(),
                error,
            });
        }

        for owner in &owners {
            self.invalidator.after_write(*owner).await;
        }

        info!(
            count = unique.len(),
            is_active,
            owners = owners.len(),
            "bulk update completed"
        );

        Ok(BulkActivationReport {
            is_active,
            updated: report.succeeded(),
            failed: report.failed(),
            cancelled: report.cancelled(),
            results,
        })
    }
}
