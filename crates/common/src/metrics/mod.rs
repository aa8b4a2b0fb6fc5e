//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions. The exporter
//! itself is installed by the gateway binary.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all askdocs metrics
pub const METRICS_PREFIX: &str = "askdocs";

/// Buckets for upstream call and end-to-end query latency (in seconds)
/// Upstream calls are bounded by a 15s timeout by default
pub const LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    15.00,  // 15s - upstream timeout
    30.00,  // 30s
    60.00,  // 60s - request timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answered queries"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_query_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Failed queries by pipeline stage"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Completion metrics
    describe_counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion API requests"
    );

    describe_histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Answer synthesis latency in seconds"
    );

    // Corpus metrics
    describe_counter!(
        format!("{}_corpus_records_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Stored passage records skipped as malformed"
    );

    // OCR metrics
    describe_counter!(
        format!("{}_ocr_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Image text extractions by outcome"
    );

    tracing::info!("Metrics registered");
}

fn status_label(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record completion metrics
pub fn record_completion(duration_secs: f64, model: &str, success: bool) {
    counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a completed query
pub fn record_query(duration_secs: f64, with_image: bool) {
    let modality = if with_image { "text_image" } else { "text" };

    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "modality" => modality
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "modality" => modality
    )
    .record(duration_secs);
}

/// Helper to record a query that stopped at `stage`
pub fn record_query_failure(stage: &'static str) {
    counter!(
        format!("{}_query_failures_total", METRICS_PREFIX),
        "stage" => stage
    )
    .increment(1);
}

/// Helper to record malformed corpus rows
pub fn record_skipped_records(count: usize) {
    if count == 0 {
        return;
    }

    counter!(format!("{}_corpus_records_skipped_total", METRICS_PREFIX))
        .increment(count as u64);
}

/// Helper to record OCR outcomes
pub fn record_ocr(extracted: bool) {
    let outcome = if extracted { "extracted" } else { "no_text" };

    counter!(
        format!("{}_ocr_runs_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}
