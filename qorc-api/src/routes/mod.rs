//! Route handlers and router assembly for the query orchestration API.

pub mod ask;
pub mod feedback;
pub mod health;

pub use ask::ask;
pub use feedback::{update_feedback, UpdateFeedbackRequest, UpdateFeedbackResponse};
pub use health::{healthz, readyz};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ApiConfig;
use crate::middleware::{auth_middleware, rate_limit_middleware, AuthMiddlewareState, RateLimitState};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the full Axum router: public health/metrics endpoints plus the
/// authenticated `/api/v1` surface (ask, feedback).
pub fn create_api_router(state: AppState) -> Router {
    let auth_state = AuthMiddlewareState::new((*state.auth_config).clone());
    let rate_limit_state = RateLimitState::new((*state.api_config).clone());

    let protected = Router::new()
        .route("/ask", post(ask))
        .route("/feedback", post(update_feedback))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(healthz))
        .route("/health/ready", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", protected)
        .merge(public)
        .layer(cors_layer(&state.api_config))
        .layer(middleware::from_fn(observability_middleware))
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-api-key"),
            axum::http::HeaderName::from_static("x-tenant-id"),
        ])
        .max_age(std::time::Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        layer.allow_origin(AllowOrigin::any())
    } else {
        let config = Arc::new(config.clone());
        layer.allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin.to_str().map(|o| config.is_origin_allowed(o)).unwrap_or(false)
        }))
    }
}
