//! Shared application state for Axum routers.

use std::sync::Arc;

use axum::extract::FromRef;
use qorc_core::orchestrator::Orchestrator;

use crate::auth::AuthConfig;
use crate::config::ApiConfig;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth_config: Arc<AuthConfig>,
    pub api_config: Arc<ApiConfig>,
    pub start_time: std::time::Instant,
}

impl FromRef<AppState> for Arc<Orchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.auth_config.clone()
    }
}

impl FromRef<AppState> for Arc<ApiConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.api_config.clone()
    }
}

impl FromRef<AppState> for std::time::Instant {
    fn from_ref(state: &AppState) -> Self {
        state.start_time
    }
}
