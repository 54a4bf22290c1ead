use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "habit_tracker_cache_response_total",
            Unit::Count,
            "Response cache lookups by outcome (hit, stored, uncached)."
        );
        describe_counter!(
            "habit_tracker_cache_invalidated_keys_total",
            Unit::Count,
            "Keys removed from the shared store by invalidation scope."
        );
        describe_counter!(
            "habit_tracker_rate_limit_rejected_total",
            Unit::Count,
            "Requests rejected by the fixed-window rate limiter."
        );
        describe_counter!(
            "habit_tracker_stats_cache_total",
            Unit::Count,
            "Statistics cache lookups by outcome."
        );
        describe_counter!(
            "habit_tracker_stats_task_failed_total",
            Unit::Count,
            "Per-habit statistics tasks that did not produce a result."
        );
        describe_histogram!(
            "habit_tracker_stats_aggregate_ms",
            Unit::Milliseconds,
            "Statistics aggregation latency in milliseconds."
        );
        describe_counter!(
            "habit_tracker_worker_jobs_total",
            Unit::Count,
            "Worker pool jobs by pool and outcome."
        );
    });
}
