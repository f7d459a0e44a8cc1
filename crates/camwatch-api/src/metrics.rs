//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::QueueStats;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "camwatch_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "camwatch_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "camwatch_http_requests_in_flight";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "camwatch_queue_length";
    pub const QUEUE_DLQ_LENGTH: &str = "camwatch_queue_dlq_length";
    pub const QUEUE_DELAYED_LENGTH: &str = "camwatch_queue_delayed_length";
    pub const REANALYSIS_REQUESTS_TOTAL: &str = "camwatch_reanalysis_requests_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "camwatch_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Update the queue gauges.
pub fn set_queue_stats(stats: &QueueStats) {
    gauge!(names::QUEUE_LENGTH).set(stats.queue_length as f64);
    gauge!(names::QUEUE_DLQ_LENGTH).set(stats.dlq_length as f64);
    gauge!(names::QUEUE_DELAYED_LENGTH).set(stats.delayed_length as f64);
}

/// Record a reanalysis request by outcome.
pub fn record_reanalysis(outcome: &'static str) {
    counter!(names::REANALYSIS_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace numeric path segments so ids do not explode label cardinality.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/segments/42/detections"),
            "/api/segments/:id/detections"
        );
        assert_eq!(sanitize_path("/api/gpu/metrics"), "/api/gpu/metrics");
        assert_eq!(sanitize_path("/"), "/");
    }
}
