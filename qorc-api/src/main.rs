//! Query Orchestration API Server Entry Point
//!
//! Bootstraps configuration, wires the orchestration core's components, and
//! starts the Axum HTTP server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;

use qorc_api::telemetry::{init_tracer, shutdown_tracer, TelemetryConfig};
use qorc_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig};

use qorc_core::circuit_breaker::CircuitBreakerRegistry;
use qorc_core::coretrieval::{CoRetrievalConfig, CoRetrievalTracker};
use qorc_core::llm::{LlmCoordinator, TableAgentSelector};
use qorc_core::memory_writer::{IdempotencyLedger, MemoryWriter, MemoryWriterConfig};
use qorc_core::orchestrator::{Orchestrator, OrchestratorTuning};
use qorc_core::planner::{QueryPlanner, QueryPlannerConfig};
use qorc_core::preflight::PreflightGate;
use qorc_core::privacy::PrivacyPolicy;
use qorc_core::rate_limiter::RateLimiter;
use qorc_core::retrieval::RetrievalEngine;
use qorc_core::OrchestratorConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let config = OrchestratorConfig::from_env()
        .map_err(|e| ApiError::internal_error(format!("Invalid orchestrator configuration: {}", e)))?;
    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();

    let orchestrator = Arc::new(build_orchestrator(&config));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        auth_config: Arc::new(auth_config),
        api_config: Arc::new(api_config),
        start_time: Instant::now(),
    };

    let app: Router = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting query orchestration API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    orchestrator.shutdown().await;
    shutdown_tracer();
    Ok(())
}

/// Wires every orchestration-core component from [`OrchestratorConfig`].
///
/// The concrete LLM/vector-store/web-search/audit-log oracles are the
/// in-memory fakes behind the `demo-fakes` feature -- this crate never
/// depends on a concrete provider SDK (those are out of scope), so until a
/// real oracle implementation is wired in, this is the runnable default.
#[cfg(feature = "demo-fakes")]
fn build_orchestrator(config: &OrchestratorConfig) -> Orchestrator {
    use qorc_core::testing::{
        FakeAugmenter, FakeDirectDataHandler, FakeEmbedder, FakeFactExtractor, FakeIntentClassifier,
        FakeLlmAgent, FakeSearchDetector, FakeVectorStore, SpyAuditLog, SpyWebSearchProvider,
    };
    use qorc_core::Intent;

    let preflight = Arc::new(PreflightGate::new());

    let rate_limiter = Arc::new(RateLimiter::new(
        config.global_rate_limit as usize,
        config.blocked_rate_limit as usize,
        config.rate_limit_window_seconds,
    ));

    let planner = Arc::new(QueryPlanner::new(
        QueryPlannerConfig { enable_web_search: config.enable_web_search },
        Arc::new(FakeIntentClassifier::fixed(Intent::General, 0.9)),
        Arc::new(FakeAugmenter::identity()),
        Arc::new(FakeSearchDetector::always(false)),
    ));

    let coretrieval = Arc::new(CoRetrievalTracker::new(CoRetrievalConfig::default()));
    let retrieval = Arc::new(RetrievalEngine::new(
        coretrieval.clone(),
        Arc::new(FakeVectorStore::seeded(Vec::new())),
        Arc::new(SpyWebSearchProvider::seeded(Vec::new())),
        Arc::new(FakeEmbedder::default()),
        Arc::new(SpyAuditLog::default()),
    ));

    let breakers = Arc::new(CircuitBreakerRegistry::new(
        config.cb_failure_threshold,
        Duration::from_secs(config.cb_recovery_timeout_s),
        config.cb_success_threshold,
    ));

    let default_agent = "assistant";
    let mut agents: HashMap<String, Arc<dyn qorc_core::traits::LlmAgent>> = HashMap::new();
    agents.insert(
        default_agent.to_string(),
        Arc::new(FakeLlmAgent::always_succeeds(default_agent, "This is a demo response.")),
    );
    let llm = Arc::new(LlmCoordinator::new(
        agents,
        vec![default_agent.to_string()],
        breakers.clone(),
        Arc::new(TableAgentSelector::new(HashMap::new(), default_agent)),
        default_agent,
        config.max_context_chars,
    ));

    let memory_writer = Arc::new(MemoryWriter::new(
        MemoryWriterConfig {
            raw_ttl_seconds: config.raw_ttl_seconds,
            enriched_ttl_seconds: config.enriched_ttl_seconds,
            knowledge_ttl_seconds: config.knowledge_ttl_seconds,
            fact_extraction_enabled: true,
        },
        Arc::new(IdempotencyLedger::new()),
        Arc::new(FakeFactExtractor),
    ));

    let privacy = Arc::new(PrivacyPolicy::new());

    Orchestrator::new(
        preflight,
        rate_limiter,
        planner,
        retrieval,
        llm,
        memory_writer,
        privacy,
        breakers,
        coretrieval,
        Arc::new(FakeDirectDataHandler::none()),
        OrchestratorTuning {
            max_context_chars: config.max_context_chars,
            passthrough_threshold: config.passthrough_threshold,
            ..OrchestratorTuning::default()
        },
    )
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("QORC_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("QORC_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
