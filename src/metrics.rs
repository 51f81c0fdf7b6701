use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::audit::SubmitError;

/// Install the Prometheus recorder and describe every metric
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!("scoring_requests_total", "Prediction requests by endpoint and status");
    describe_counter!("scoring_rows_total", "Rows scored by the inference backend");
    describe_histogram!(
        "scoring_inference_duration_seconds",
        "Inference backend call duration in seconds"
    );
    describe_counter!("scoring_audit_entries_total", "Audit entries by publish outcome");
    describe_counter!(
        "scoring_audit_dropped_total",
        "Audit batches dropped before reaching the publisher"
    );
    describe_counter!("scoring_shipper_flushes_total", "Shipper flushes by outcome");
    describe_counter!("scoring_shipper_rows_total", "Rows written to object storage");
    describe_gauge!("scoring_gateway_info", "Gateway version information");

    gauge!("scoring_gateway_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a finished HTTP prediction request
pub fn record_request(endpoint: &str, status: u16) {
    counter!(
        "scoring_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record one inference backend call
pub fn record_inference(outcome: &str, duration: Duration) {
    histogram!(
        "scoring_inference_duration_seconds",
        "outcome" => outcome.to_string(),
    )
    .record(duration.as_secs_f64());
}

pub fn record_rows_scored(rows: usize) {
    counter!("scoring_rows_total").increment(rows as u64);
}

/// Record the outcome of publishing audit entries
pub fn record_audit_publish(outcome: &str, entries: usize) {
    counter!(
        "scoring_audit_entries_total",
        "outcome" => outcome.to_string(),
    )
    .increment(entries as u64);
}

pub fn record_audit_dropped(reason: &SubmitError) {
    let reason = match reason {
        SubmitError::Full => "full",
        SubmitError::Closed => "closed",
    };
    counter!("scoring_audit_dropped_total", "reason" => reason).increment(1);
}

/// Record a shipper flush; `rows` counts toward storage only on success
pub fn record_flush(outcome: &str, trigger: &str, rows: usize) {
    counter!(
        "scoring_shipper_flushes_total",
        "outcome" => outcome.to_string(),
        "trigger" => trigger.to_string(),
    )
    .increment(1);
    if outcome == "success" {
        counter!("scoring_shipper_rows_total").increment(rows as u64);
    }
}
