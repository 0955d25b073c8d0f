//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: qorc_core::HealthStatus,
    pub uptime_seconds: u64,
}

/// Liveness probe: the process is up and serving requests.
#[cfg_attr(
    feature = "openapi",
    utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)), tag = "Observability")
)]
pub async fn healthz(State(start_time): State<std::time::Instant>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: qorc_core::HealthStatus::Healthy,
        uptime_seconds: start_time.elapsed().as_secs(),
    })
}

/// Readiness probe: distinct from liveness so a load balancer can drain
/// traffic without killing the process.
#[cfg_attr(
    feature = "openapi",
    utoipa::path(get, path = "/health/ready", responses((status = 200, body = HealthResponse)), tag = "Observability")
)]
pub async fn readyz(State(start_time): State<std::time::Instant>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: qorc_core::HealthStatus::Healthy,
        uptime_seconds: start_time.elapsed().as_secs(),
    })
}
