use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{METRIC_CACHE_BACKEND_ERROR_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL};
use crate::config::{LogFormat, LoggingSettings};
use crate::session::{METRIC_TX_COMMIT_TOTAL, METRIC_TX_DURATION_MS, METRIC_TX_ROLLBACK_TOTAL};

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

/// Register descriptions for every metric this crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_TX_COMMIT_TOTAL,
            Unit::Count,
            "Total number of committed transactions."
        );
        describe_counter!(
            METRIC_TX_ROLLBACK_TOTAL,
            Unit::Count,
            "Total number of rolled back or abandoned transactions."
        );
        describe_histogram!(
            METRIC_TX_DURATION_MS,
            Unit::Milliseconds,
            "Time from BEGIN to COMMIT or ROLLBACK in milliseconds."
        );
        describe_counter!(
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of cached calls answered from the cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of cached calls that ran the wrapped function."
        );
        describe_counter!(
            METRIC_CACHE_BACKEND_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed cache backend operations."
        );
    });
}
