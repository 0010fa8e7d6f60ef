//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `site_requests_total` - Requests completed (labels: method, status)
//! - `site_rate_limited_total` - Requests whose (ip hash, route) key was over budget
//! - `site_error_reports_total` - Reports handed to the error sink (label: kind)
//!
//! ## Histograms
//! - `site_request_duration_seconds` - Pipeline duration (labels: method, status)
//!
//! ## Gauges
//! - `site_rate_limit_keys` - Keys currently tracked by the rate limiter
//!
//! Routes are not a label and extension methods are recorded as `OTHER`:
//! both are client-controlled and would make label cardinality unbounded.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "site_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "site_rate_limited_total";
    pub const ERROR_REPORTS_TOTAL: &str = "site_error_reports_total";
    pub const REQUEST_DURATION_SECONDS: &str = "site_request_duration_seconds";
    pub const RATE_LIMIT_KEYS: &str = "site_rate_limit_keys";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of requests completed");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests observed while their rate-limit key was over budget"
    );
    describe_counter!(
        names::ERROR_REPORTS_TOTAL,
        "Error reports handed to the error-tracking sink"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Request duration through the pipeline in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_KEYS,
        "Number of keys tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Label value for an HTTP method. Extension methods collapse into `OTHER`.
pub fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "OPTIONS" => "OPTIONS",
        "CONNECT" => "CONNECT",
        "TRACE" => "TRACE",
        _ => "OTHER",
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let method = method_label(method);
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "method" => method, "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method, "status" => status)
        .record(duration_secs);
}

/// Record a request seen while its key was over budget.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record a report handed to the error sink.
pub fn record_error_report(kind: &'static str) {
    counter!(names::ERROR_REPORTS_TOTAL, "kind" => kind).increment(1);
}

/// Update the tracked-key gauge.
pub fn set_rate_limit_keys(count: usize) {
    gauge!(names::RATE_LIMIT_KEYS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must not panic.

    #[test]
    fn test_record_request() {
        record_request("GET", 200, 0.012);
        record_request("POST", 500, 1.5);
    }

    #[test]
    fn test_method_label_is_bounded() {
        assert_eq!(method_label("GET"), "GET");
        assert_eq!(method_label("OPTIONS"), "OPTIONS");
        assert_eq!(method_label("PROPFIND"), "OTHER");
        assert_eq!(method_label("get"), "OTHER");
        assert_eq!(method_label(&"X".repeat(512)), "OTHER");
    }

    #[test]
    fn test_counters_and_gauges() {
        record_rate_limited();
        record_error_report("exception");
        set_rate_limit_keys(42);
    }
}
