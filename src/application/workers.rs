//! Bounded worker pool for independent jobs.
//!
//! A fixed number of workers pull jobs from one shared queue, one job at a
//! time. Every job yields exactly one [`JobOutcome`]; jobs are never retried.

use std::{
    collections::VecDeque,
    fmt::Display,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::FutureExt;
use metrics::counter;
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use crate::util::lock::mutex_lock;

const METRIC_WORKER_JOBS_TOTAL: &str = "habit_tracker_worker_jobs_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Succeeded(T),
    Failed(String),
    /// The job had not finished when the dispatch deadline passed.
    Cancelled,
}

impl<T> JobOutcome<T> {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded(_) => "succeeded",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Outcomes of one dispatch, in the order the jobs were submitted.
#[derive(Debug, Clone)]
pub struct DispatchReport<T> {
    pub outcomes: Vec<JobOutcome<T>>,
    pub timed_out: bool,
}

impl<T> Default for DispatchReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
            timed_out: false,
        }
    }
}

impl<T> DispatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Cancelled))
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.outcomes.len()
    }

    fn count(&self, predicate: impl Fn(&JobOutcome<T>) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| predicate(outcome)).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    deadline: Option<Duration>,
}

impl WorkerPool {
    pub fn new(workers: usize, deadline: Option<Duration>) -> Self {
        Self {
            workers: workers.max(1),
            deadline,
        }
    }

    /// Run `handler` over every job with at most `min(workers, jobs)` jobs in
    /// flight and collect one outcome per job.
    pub async fn dispatch<J, T, E, F, Fut>(
        &self,
        name: &'static str,
        jobs: Vec<J>,
        handler: F,
    ) -> DispatchReport<T>
    where
        J: Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = jobs.len();
        if total == 0 {
            return DispatchReport::default();
        }

        let workers = self.workers.min(total);
        let queue = Arc::new(Mutex::new(
            jobs.into_iter().enumerate().collect::<VecDeque<_>>(),
        ));
        let handler = Arc::new(handler);
        let (results_tx, mut results_rx) = mpsc::channel::<(usize, JobOutcome<T>)>(total);

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue.clone();
            let handler = handler.clone();
            let results_tx = results_tx.clone();
            set.spawn(async move {
                loop {
                    let next = mutex_lock(&queue, "application::workers", "pop_job").pop_front();
                    let Some((index, job)) = next else {
                        break;
                    };

                    // A panicking job fails alone; the worker moves on.
                    let outcome = match AssertUnwindSafe(async { handler(job).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(value)) => JobOutcome::Succeeded(value),
                        Ok(Err(err)) => JobOutcome::Failed(err.to_string()),
                        Err(_) => {
                            warn!(pool = name, worker_id, job = index, "job panicked");
                            JobOutcome::Failed("job panicked".to_string())
                        }
                    };
                    debug!(pool = name, worker_id, job = index, outcome = outcome.label(), "job finished");

                    if results_tx.send((index, outcome)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(results_tx);

        let mut outcomes: Vec<Option<JobOutcome<T>>> = (0..total).map(|_| None).collect();
        // A deadline too far out to represent is no deadline.
        let deadline = self
            .deadline
            .and_then(|limit| Instant::now().checked_add(limit));
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(at) => match timeout_at(at, results_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => results_rx.recv().await,
            };
            let Some((index, outcome)) = next else {
                break;
            };
            outcomes[index] = Some(outcome);
        }

        if timed_out {
            set.abort_all();
        }
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined
                && err.is_panic()
            {
                warn!(pool = name, error = %err, "worker panicked");
            }
        }
        // Results sent between the deadline and the abort still count.
        while let Ok((index, outcome)) = results_rx.try_recv() {
            outcomes[index] = Some(outcome);
        }

        let outcomes: Vec<JobOutcome<T>> = outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(JobOutcome::Cancelled))
            .collect();
        for outcome in &outcomes {
            counter!(METRIC_WORKER_JOBS_TOTAL, "pool" => name, "outcome" => outcome.label())
                .increment(1);
        }

        let report = DispatchReport {
            outcomes,
            timed_out,
        };
        info!(
            pool = name,
            workers,
            jobs = total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            timed_out,
            "dispatch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn every_job_reports_exactly_once() {
        for workers in [1, 3, 8, 50] {
            let pool = WorkerPool::new(workers, None);
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();

            let report = pool
                .dispatch("test", (0..20).collect(), move |job: usize| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(job * 2)
                    }
                })
                .await;

            assert_eq!(report.outcomes.len(), 20);
            assert_eq!(calls.load(Ordering::SeqCst), 20);
            for (index, outcome) in report.outcomes.iter().enumerate() {
                assert_eq!(outcome, &JobOutcome::Succeeded(index * 2));
            }
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_other_jobs() {
        let pool = WorkerPool::new(2, None);
        let report = pool
            .dispatch("test", vec![1, 2, 3, 4], |job: i32| async move {
                if job % 2 == 0 {
                    Err(format!("job {job} rejected"))
                } else {
                    Ok(job)
                }
            })
            .await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.outcomes[1], JobOutcome::Failed("job 2 rejected".to_string()));
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn panicking_job_fails_without_losing_its_worker() {
        let pool = WorkerPool::new(1, None);
        let report = pool
            .dispatch("test", vec![1, 2, 3], |job: i32| async move {
                if job == 2 {
                    panic!("job {job} exploded");
                }
                Ok::<_, String>(job)
            })
            .await;

        assert!(!report.timed_out);
        assert_eq!(report.outcomes[0], JobOutcome::Succeeded(1));
        assert_eq!(report.outcomes[1], JobOutcome::Failed("job panicked".to_string()));
        assert_eq!(report.outcomes[2], JobOutcome::Succeeded(3));
        assert_eq!(report.cancelled(), 0);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_runs_to_completion() {
        let pool = WorkerPool::new(2, Some(Duration::MAX));
        let report = pool
            .dispatch("test", vec![1, 2], |job: i32| async move { Ok::<_, String>(job) })
            .await;

        assert!(!report.timed_out);
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn in_flight_jobs_are_bounded_by_worker_count() {
        let pool = WorkerPool::new(3, None);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_c, peak_c) = (active.clone(), peak.clone());

        pool.dispatch("test", (0..12).collect::<Vec<u32>>(), move |_| {
            let active = active_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_unfinished_jobs() {
        let pool = WorkerPool::new(2, Some(Duration::from_millis(100)));
        let report = pool
            .dispatch("test", vec![0u64, 1, 10_000, 10_000], |millis| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<_, String>(millis)
            })
            .await;

        assert!(report.timed_out);
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.outcomes[0], JobOutcome::Succeeded(0));
        assert_eq!(report.outcomes[1], JobOutcome::Succeeded(1));
        assert_eq!(report.cancelled(), 2);
    }

    #[tokio::test]
    async fn empty_dispatch_is_a_no_op() {
        let pool = WorkerPool::new(4, None);
        let report = pool
            .dispatch("test", Vec::<u8>::new(), |_| async { Ok::<_, String>(()) })
            .await;
        assert!(report.outcomes.is_empty());
        assert!(report.all_succeeded());
    }
}
