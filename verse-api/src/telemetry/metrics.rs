//! Prometheus metrics.
//!
//! Registered once in the default registry and exposed on `/metrics`.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<VerseMetrics>> = Lazy::new(VerseMetrics::new);

/// Registered metrics, or `None` if registration failed (already logged).
pub fn metrics() -> Option<&'static VerseMetrics> {
    METRICS.as_ref().ok()
}

#[derive(Clone)]
pub struct VerseMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Daily quota decisions - labels: tier, outcome (allowed/limited)
    pub quota_decisions_total: CounterVec,

    /// VerseCoin debits - labels: outcome (debited/replayed/insufficient)
    pub versecoin_debits_total: CounterVec,

    /// Incoming webhooks - labels: provider, outcome
    pub webhook_events_total: CounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    tracing::error!(metric = name, error = %e, "Failed to register metric");
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl VerseMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "verse_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "verse_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            quota_decisions_total: register_counter_vec!(
                "verse_quota_decisions_total",
                "Daily message quota decisions",
                &["tier", "outcome"]
            )
            .map_err(|e| registration_error("quota_decisions_total", e))?,

            versecoin_debits_total: register_counter_vec!(
                "verse_versecoin_debits_total",
                "VerseCoin debit attempts",
                &["outcome"]
            )
            .map_err(|e| registration_error("versecoin_debits_total", e))?,

            webhook_events_total: register_counter_vec!(
                "verse_webhook_events_total",
                "Incoming provider webhooks",
                &["provider", "outcome"]
            )
            .map_err(|e| registration_error("webhook_events_total", e))?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_quota_decision(&self, tier: &str, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "limited" };
        self.quota_decisions_total
            .with_label_values(&[tier, outcome])
            .inc();
    }

    pub fn record_debit(&self, outcome: &str) {
        self.versecoin_debits_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// outcome: processed, duplicate, rejected, failed, ignored
    pub fn record_webhook(&self, provider: &str, outcome: &str) {
        self.webhook_events_total
            .with_label_values(&[provider, outcome])
            .inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Register before the first gather so the families always appear.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.error))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_domain_metrics() -> Result<(), String> {
        let metrics = metrics().ok_or("metrics unavailable")?;
        metrics.record_http_request("POST", "/api/rate-limit/check", 429, 0.004);
        metrics.record_quota_decision("free", false);
        metrics.record_debit("insufficient");
        metrics.record_webhook("stripe", "duplicate");

        let limited = metrics
            .quota_decisions_total
            .with_label_values(&["free", "limited"])
            .get();
        assert!(limited >= 1.0);
        Ok(())
    }
}
