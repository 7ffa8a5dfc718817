//! Verse Telemetry - Observability Infrastructure
//!
//! Structured logging, optional OTLP trace export and Prometheus metrics.
//! Everything works without an external collector.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, VerseMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, shutdown_tracer, TelemetryConfig};
