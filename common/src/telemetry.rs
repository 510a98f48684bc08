// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter,
    Registry,
};

/// Handle used to swap the log filter once the trigger config is known
pub type LogFilterHandle = reload::Handle<EnvFilter, Registry>;

/// Output format of the log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Initialize logging with a reloadable filter
///
/// `RUST_LOG` wins over `log_level` when set. The returned handle is used by
/// [`apply_log_filter`] to silence targets listed in the trigger config.
pub fn init_logging(log_level: &str, format: LogFormat) -> Result<LogFilterHandle> {
    let (filter_layer, handle) = reload::Layer::new(build_filter(log_level, &[])?);

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    Ok(handle)
}

/// Build the filter for a base level plus a list of silenced targets
pub fn build_filter(log_level: &str, silenced: &[String]) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    for target in silenced {
        let directive: Directive = format!("{}=off", target)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", target, e))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Silence the given targets on an initialized subscriber
pub fn apply_log_filter(
    handle: &LogFilterHandle,
    log_level: &str,
    silenced: &[String],
) -> Result<()> {
    if silenced.is_empty() {
        return Ok(());
    }

    handle
        .reload(build_filter(log_level, silenced)?)
        .map_err(|e| anyhow::anyhow!("Failed to reload log filter: {}", e))?;

    tracing::info!(targets = ?silenced, "Log filters applied");
    Ok(())
}

/// Initialize Prometheus metrics exporter
#[tracing::instrument]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "pulse_tasks_published_total",
        "Total number of tasks published to the queue"
    );
    describe_counter!(
        "pulse_publish_failures_total",
        "Total number of failed task publishes"
    );
    describe_counter!(
        "scheduled_job_skipped_total",
        "Runs skipped because the previous run was still in flight"
    );
    describe_counter!("status_uploads_total", "Status document uploads by outcome");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_task_published(job_name: &str, topic: &str) {
    counter!(
        "pulse_tasks_published_total",
        "job_name" => job_name.to_string(),
        "topic" => topic.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_publish_failure(job_name: &str, topic: &str) {
    counter!(
        "pulse_publish_failures_total",
        "job_name" => job_name.to_string(),
        "topic" => topic.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_job_skipped(job_id: &str) {
    counter!("scheduled_job_skipped_total", "job_id" => job_id.to_string()).increment(1);
}

#[inline]
pub fn record_status_upload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("status_uploads_total", "outcome" => outcome).increment(1);
}
