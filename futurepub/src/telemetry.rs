// Structured logging and Prometheus metrics for the scheduler

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over `log_level`. JSON output carries the
/// current span and span list so every line can be tied back to its envelope.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Install the Prometheus exporter and describe every scheduler metric
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "futurepub_submitted_total",
        "Messages submitted, labelled by direct or scheduled mode"
    );
    describe_counter!(
        "futurepub_published_total",
        "Envelopes released to their destination exchange"
    );
    describe_counter!(
        "futurepub_requeued_total",
        "Envelopes sent back to the pending queue"
    );
    describe_counter!(
        "futurepub_evaluation_skipped_total",
        "Deliveries left unacknowledged because the broker was disconnected"
    );
    describe_counter!(
        "futurepub_failures_total",
        "Envelope failures after retries, labelled by stage"
    );
    describe_counter!(
        "futurepub_envelopes_dropped_total",
        "Envelopes acknowledged without being delivered or parked"
    );
    describe_histogram!(
        "futurepub_delivery_lateness_seconds",
        "Seconds between an envelope's wake time and its release"
    );
    describe_histogram!(
        "futurepub_requeue_ttl_seconds",
        "Expiration given to requeued envelopes"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_submission(scheduled: bool) {
    let mode = if scheduled { "scheduled" } else { "direct" };
    counter!("futurepub_submitted_total", "mode" => mode).increment(1);
}

/// `lateness_ms` may be negative when the envelope is released inside the threshold window
#[inline]
pub fn record_published(destination: &str, lateness_ms: i64) {
    counter!("futurepub_published_total", "destination" => destination.to_string()).increment(1);
    histogram!("futurepub_delivery_lateness_seconds").record(lateness_ms as f64 / 1000.0);
}

#[inline]
pub fn record_requeued(ttl_ms: u32) {
    counter!("futurepub_requeued_total").increment(1);
    histogram!("futurepub_requeue_ttl_seconds").record(f64::from(ttl_ms) / 1000.0);
}

#[inline]
pub fn record_skipped() {
    counter!("futurepub_evaluation_skipped_total").increment(1);
}

#[inline]
pub fn record_failure(stage: &str) {
    counter!("futurepub_failures_total", "stage" => stage.to_string()).increment(1);
}

#[inline]
pub fn record_dropped(stage: &str) {
    counter!("futurepub_envelopes_dropped_total", "stage" => stage.to_string()).increment(1);
}
