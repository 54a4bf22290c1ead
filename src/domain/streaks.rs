//! Completion-rate and streak computation over a habit's log history.

use super::entities::HabitId;
use super::stats::HabitStat;

/// Summarize a habit from its completion flags ordered most-recent-first.
///
/// `current_streak` anchors at the most recent entry and stops at the first
/// incomplete one; `longest_streak` is the longest completed run anywhere.
pub fn summarize<I>(habit_id: HabitId, completions_newest_first: I) -> HabitStat
where
    I: IntoIterator<Item = bool>,
{
    let mut total = 0u32;
    let mut completed = 0u32;
    let mut current = 0u32;
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut anchored = true;

    for is_completed in completions_newest_first {
        total += 1;
        if is_completed {
            completed += 1;
            run += 1;
            longest = longest.max(run);
            if anchored {
                current = run;
            }
        } else {
            anchored = false;
            run = 0;
        }
    }

    HabitStat {
        habit_id,
        total_logs: total,
        completed_logs: completed,
        completion_rate: completion_rate(completed, total),
        current_streak: current,
        longest_streak: longest,
    }
}

pub fn completion_rate(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(completed) / f64::from(total) * 100.0
}

/// Unweighted mean of per-habit completion rates; zero for an empty set.
pub fn mean_completion_rate<'a, I>(stats: I) -> f64
where
    I: IntoIterator<Item = &'a HabitStat>,
{
    let (sum, count) = stats
        .into_iter()
        .fold((0.0_f64, 0u32), |(sum, count), stat| {
            (sum + stat.completion_rate, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_all_zero() {
        let stat = summarize(7, std::iter::empty());
        assert_eq!(stat.habit_id, 7);
        assert_eq!(stat.total_logs, 0);
        assert_eq!(stat.completed_logs, 0);
        assert_eq!(stat.completion_rate, 0.0);
        assert_eq!(stat.current_streak, 0);
        assert_eq!(stat.longest_streak, 0);
    }

    #[test]
    fn broken_recent_streak() {
        let stat = summarize(1, [false, true, true, false, true]);
        assert_eq!(stat.total_logs, 5);
        assert_eq!(stat.completed_logs, 3);
        assert!((stat.completion_rate - 60.0).abs() < f64::EPSILON);
        assert_eq!(stat.current_streak, 0);
        assert_eq!(stat.longest_streak, 2);
    }

    #[test]
    fn unbroken_history() {
        let stat = summarize(1, [true, true, true]);
        assert_eq!(stat.current_streak, 3);
        assert_eq!(stat.longest_streak, 3);
        assert!((stat.completion_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn longest_run_can_be_older_than_current() {
        let stat = summarize(1, [true, false, true, true, true, false]);
        assert_eq!(stat.current_streak, 1);
        assert_eq!(stat.longest_streak, 3);
        assert!(stat.longest_streak >= stat.current_streak);
    }

    #[test]
    fn mean_ignores_log_volume() {
        let a = summarize(1, [true]);
        let b = summarize(2, [false, false, false, true]);
        let mean = mean_completion_rate([&a, &b]);
        assert!((mean - 62.5).abs() < 1e-9);
        assert_eq!(mean_completion_rate(std::iter::empty()), 0.0);
    }
}
