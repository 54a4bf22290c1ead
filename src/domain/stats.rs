//! Statistics payloads produced by the aggregator and served to clients.

use serde::{Deserialize, Serialize};

use super::entities::{HabitId, UserId};

/// Completion and streak figures for a single habit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitStat {
    pub habit_id: HabitId,
    pub total_logs: u32,
    pub completed_logs: u32,
    /// Percentage in `0.0..=100.0`; zero when the habit has no logs.
    pub completion_rate: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
}

/// Aggregate statistics for every habit owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: UserId,
    pub total_habits: u32,
    pub active_habits: u32,
    /// Unweighted mean of the per-habit completion rates that were computed.
    pub overall_completion_rate: f64,
    pub habit_stats: Vec<HabitStat>,
    pub processing_time_ms: u64,
    /// Habits whose statistics could not be computed for this response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_habits: Vec<HabitId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl UserStats {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            total_habits: 0,
            active_habits: 0,
            overall_completion_rate: 0.0,
            habit_stats: Vec::new(),
            processing_time_ms: 0,
            failed_habits: Vec::new(),
            timed_out: false,
        }
    }
}
