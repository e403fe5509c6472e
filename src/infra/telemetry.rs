use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Log lines go to stderr; stdout carries the preview records.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
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

/// Register descriptions for every metric the crate emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "linkpeek_render_started_total",
            Unit::Count,
            "Total number of page renders started on an engine."
        );
        describe_counter!(
            "linkpeek_render_coalesced_total",
            Unit::Count,
            "Total number of requests that joined an existing render or queue entry."
        );
        describe_counter!(
            "linkpeek_render_queued_total",
            Unit::Count,
            "Total number of URLs queued because every engine was busy."
        );
        describe_counter!(
            "linkpeek_render_timeout_total",
            Unit::Count,
            "Total number of renders forced to fail by the render timeout."
        );
        describe_counter!(
            "linkpeek_render_late_completion_total",
            Unit::Count,
            "Total number of engine completions ignored because the render already finished."
        );
        describe_counter!(
            "linkpeek_render_failed_total",
            Unit::Count,
            "Total number of failed renders, labelled by failure kind."
        );
        describe_gauge!(
            "linkpeek_render_queue_len",
            Unit::Count,
            "Current number of URLs waiting for a free render engine."
        );
        describe_histogram!(
            "linkpeek_render_ms",
            Unit::Milliseconds,
            "Render latency from navigation start to completion in milliseconds."
        );
        describe_counter!(
            "linkpeek_provider_hit_total",
            Unit::Count,
            "Total number of previews answered by the native provider."
        );
        describe_counter!(
            "linkpeek_provider_miss_total",
            Unit::Count,
            "Total number of previews the native provider could not answer."
        );
    });
}
