//! Observability Infrastructure
//!
//! OpenTelemetry tracing and Prometheus metrics for the API layer. Fully
//! functional with `tracing` alone when no OTLP collector is configured.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, QorcMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, shutdown_tracer, TelemetryConfig};
