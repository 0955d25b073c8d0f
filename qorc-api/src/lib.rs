//! Query Orchestration API -- HTTP transport layer
//!
//! Thin transport adapter over `qorc-core`'s `Orchestrator`: SSE streaming of
//! `Execute`, the `UpdateFeedback` endpoint, health/readiness, auth (JWT +
//! API key, tenant header), CORS/rate-limit hardening, OpenTelemetry tracing,
//! and Prometheus metrics. No orchestration logic lives here -- it all comes
//! from `qorc_core::orchestrator::Orchestrator`.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use auth::{
    authenticate, authenticate_api_key, authenticate_jwt, check_tenant_access, extract_tenant_id,
    generate_jwt_token, validate_api_key, validate_jwt_token, AuthConfig, AuthContext, AuthMethod,
    Claims,
};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    auth_middleware, extract_auth_context, extract_auth_context_owned, rate_limit_middleware,
    tenant_access_middleware, AuthExtractor, AuthMiddlewareState, RateLimitKey, RateLimitState,
};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use telemetry::{init_tracer, metrics_handler, shutdown_tracer, QorcMetrics, TelemetryConfig, METRICS};
