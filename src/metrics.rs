//! Prometheus metrics for request handling and pipeline activity.
//!
//! Covers:
//! - HTTP request counts and latency (recorded by the router middleware)
//! - Lead intake and stage changes
//! - Document uploads and extraction outcomes
//! - Applied schema migrations

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// HTTP request counter metric name.
pub const METRIC_HTTP_REQUESTS: &str = "http_requests_total";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Extraction provider latency metric name.
pub const METRIC_EXTRACTION_LATENCY: &str = "extraction_latency_ms";
/// New leads counter metric name.
pub const METRIC_LEADS_SUBMITTED: &str = "leads_submitted_total";
/// Duplicate lead submissions counter metric name.
pub const METRIC_LEADS_DUPLICATE: &str = "leads_duplicate_total";
/// Pipeline stage changes counter metric name.
pub const METRIC_STAGE_CHANGES: &str = "stage_changes_total";
/// Uploaded documents counter metric name.
pub const METRIC_DOCUMENTS_UPLOADED: &str = "documents_uploaded_total";
/// Extractions counter metric name.
pub const METRIC_EXTRACTIONS: &str = "extractions_total";
/// Applied migrations counter metric name.
pub const METRIC_MIGRATIONS_APPLIED: &str = "migrations_applied_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "HTTP request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_EXTRACTION_LATENCY,
        "Extraction provider round-trip latency in milliseconds"
    );

    describe_counter!(METRIC_HTTP_REQUESTS, "Total number of HTTP requests served");
    describe_counter!(METRIC_LEADS_SUBMITTED, "Total number of new leads created");
    describe_counter!(
        METRIC_LEADS_DUPLICATE,
        "Total number of lead submissions for an existing phone"
    );
    describe_counter!(METRIC_STAGE_CHANGES, "Total number of pipeline stage changes");
    describe_counter!(
        METRIC_DOCUMENTS_UPLOADED,
        "Total number of deal documents uploaded"
    );
    describe_counter!(METRIC_EXTRACTIONS, "Total number of extraction attempts by outcome");
    describe_counter!(
        METRIC_MIGRATIONS_APPLIED,
        "Total number of migration steps applied by direction"
    );

    debug!("Metrics initialized");
}

/// Record a finished HTTP request.
pub fn record_http_request(start: Instant, method: &str, path: &str, status: u16) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "path" => path.to_string()).record(latency_ms);
    counter!(
        METRIC_HTTP_REQUESTS,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Increment new leads counter.
pub fn inc_leads_submitted() {
    counter!(METRIC_LEADS_SUBMITTED).increment(1);
}

/// Increment duplicate leads counter.
pub fn inc_leads_duplicate() {
    counter!(METRIC_LEADS_DUPLICATE).increment(1);
}

/// Increment stage changes counter.
pub fn inc_stage_changes() {
    counter!(METRIC_STAGE_CHANGES).increment(1);
}

/// Increment uploaded documents counter.
pub fn inc_documents_uploaded() {
    counter!(METRIC_DOCUMENTS_UPLOADED).increment(1);
}

/// Increment extractions counter for an outcome (`success`, `fallback`, `disabled`).
pub fn inc_extractions(outcome: &'static str) {
    counter!(METRIC_EXTRACTIONS, "outcome" => outcome).increment(1);
}

/// Increment applied migrations counter (`upgrade` or `downgrade`).
pub fn inc_migrations_applied(direction: &'static str) {
    counter!(METRIC_MIGRATIONS_APPLIED, "direction" => direction).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for extraction provider calls.
pub fn timer_extraction() -> LatencyTimer {
    LatencyTimer::new(METRIC_EXTRACTION_LATENCY)
}
