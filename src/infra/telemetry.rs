use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "imgproc_retry_attempts_total",
            Unit::Count,
            "Retries issued after a transient task store or channel failure."
        );
        describe_counter!(
            "imgproc_saga_compensations_total",
            Unit::Count,
            "Compensations run while unwinding a failed saga, by outcome."
        );
        describe_counter!(
            "imgproc_worker_deliveries_total",
            Unit::Count,
            "Messages handled by the processing worker, by outcome."
        );
        describe_counter!(
            "imgproc_worker_operations_total",
            Unit::Count,
            "Image operations applied by the processing worker, by outcome."
        );
        describe_counter!(
            "imgproc_http_requests_total",
            Unit::Count,
            "HTTP requests served, by method, route and status class."
        );
        describe_counter!(
            "imgproc_channel_redeliveries_total",
            Unit::Count,
            "Messages handed out again after their lease expired."
        );
    });
}
