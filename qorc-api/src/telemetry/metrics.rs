//! Prometheus Metrics Definitions
//!
//! Defines the query-orchestration API's metrics and exposes a `/metrics`
//! endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<QorcMetrics>> = Lazy::new(QorcMetrics::new);

/// Container for all query-orchestration metrics.
#[derive(Clone)]
pub struct QorcMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Orchestrated requests - labels: intent, cache_status
    pub requests_total: CounterVec,

    /// Per-service circuit breaker state (0=closed, 1=half_open, 2=open) - label: service
    pub circuit_state: GaugeVec,

    /// Transport-level rate limit denials - label: scope (ip/tenant)
    pub rate_limit_denied_total: CounterVec,
}

impl QorcMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "qorc_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "qorc_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            requests_total: register_counter_vec!(
                "qorc_requests_total",
                "Total number of orchestrated requests",
                &["intent", "cache_status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register requests_total: {}", e)))?,

            circuit_state: register_gauge_vec!(
                "qorc_circuit_state",
                "Circuit breaker state per service (0=closed, 1=half_open, 2=open)",
                &["service"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register circuit_state: {}", e)))?,

            rate_limit_denied_total: register_counter_vec!(
                "qorc_rate_limit_denied_total",
                "Total requests denied by transport-level rate limiting",
                &["scope"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register rate_limit_denied_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total.with_label_values(&[method, path, &status_str]).inc();
        self.http_request_duration_seconds.with_label_values(&[method, path]).observe(duration_secs);
    }

    /// Record a completed orchestrated request.
    pub fn record_request(&self, intent: &str, cache_status: &str) {
        self.requests_total.with_label_values(&[intent, cache_status]).inc();
    }

    /// Set a circuit breaker's current state (0=closed, 1=half_open, 2=open).
    pub fn set_circuit_state(&self, service: &str, state_value: f64) {
        self.circuit_state.with_label_values(&[service]).set(state_value);
    }

    /// Record a transport-level rate-limit denial.
    pub fn record_rate_limit_denied(&self, scope: &str) {
        self.rate_limit_denied_total.with_label_values(&[scope]).inc();
    }
}

impl Default for QorcMetrics {
    fn default() -> Self {
        Self::new().expect("metrics registration")
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[cfg_attr(
    feature = "openapi",
    utoipa::path(
        get,
        path = "/metrics",
        tag = "Observability",
        responses(
            (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
            (status = 500, description = "Failed to encode metrics"),
        ),
    )
)]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4; charset=utf-8")], buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, [("content-type", "text/plain")], format!("Failed to encode metrics: {}", e).into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(metrics.http_requests_total.desc().len() > 0);
        Ok(())
    }

    #[test]
    fn test_record_http_request() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_http_request("POST", "/api/v1/ask", 200, 0.015);
        Ok(())
    }

    #[test]
    fn test_record_request() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_request("general", "hit");
        metrics.record_request("coding", "miss");
        Ok(())
    }

    #[test]
    fn test_circuit_state_gauge() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.set_circuit_state("claude", 0.0);
        metrics.set_circuit_state("claude", 2.0);
        Ok(())
    }

    #[test]
    fn test_rate_limit_denied_counter() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_rate_limit_denied("ip");
        metrics.record_rate_limit_denied("tenant");
        Ok(())
    }
}
