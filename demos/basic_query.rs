//! Basic Orchestrated Query Example
//!
//! Demonstrates the fundamental query-orchestration workflow:
//! 1. Build an `Orchestrator` from an `OrchestratorConfig`, wiring every
//!    pluggable oracle (intent classifier, vector store, LLM agent, ...)
//!    to an in-memory fake.
//! 2. Submit a `Request`.
//! 3. Drain the `Event` stream until a terminal `Done`/`Error`.
//!
//! Run with the `qorc-core` `test-util` feature enabled, since this demo
//! depends on `qorc_core::testing`'s fakes rather than a concrete provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

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
use qorc_core::testing::{
    FakeAugmenter, FakeDirectDataHandler, FakeEmbedder, FakeFactExtractor, FakeIntentClassifier,
    FakeLlmAgent, FakeSearchDetector, FakeVectorStore, SpyAuditLog, SpyWebSearchProvider,
};
use qorc_core::traits::LlmAgent;
use qorc_core::{EntityIdType, Event, Intent, OrchestratorConfig, Request, Role, TenantId};

#[tokio::main]
async fn main() {
    println!("=== Query Orchestration: Basic Ask ===\n");

    let config = OrchestratorConfig::default();
    let orchestrator = build_orchestrator(&config);

    let request = Request {
        query: "What's the weather like in Rust's ownership model?".to_string(),
        user_id: "demo-user".to_string(),
        tenant_id: TenantId::new_v4(),
        role: Role::Member,
        manual_agent: None,
        context_limit: 5,
        bypass_cache: false,
        conversation_id: None,
        thread_context: None,
        file_context: None,
    };

    println!("Submitting query: {:?}\n", request.query);
    let mut events = orchestrator.execute(request);

    while let Some(event) = events.recv().await {
        match event {
            Event::Status { step, message, .. } => {
                println!("[status:{}] {}", step, message);
            }
            Event::Chunk { text, .. } => {
                print!("{}", text);
            }
            Event::Done { agent_used, cache_status, latency_ms, .. } => {
                println!(
                    "\n\n=== Done (agent={}, cache={:?}, latency_ms={}) ===",
                    agent_used, cache_status, latency_ms
                );
            }
            Event::Error { step, message, reason, .. } => {
                println!("\n[error:{}] {} ({})", step, message, reason.unwrap_or_default());
            }
        }
    }

    orchestrator.shutdown().await;
}

fn build_orchestrator(config: &OrchestratorConfig) -> Orchestrator {
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
    let mut agents: HashMap<String, Arc<dyn LlmAgent>> = HashMap::new();
    agents.insert(
        default_agent.to_string(),
        Arc::new(FakeLlmAgent::always_succeeds(
            default_agent,
            "Ownership is Rust's mechanism for memory safety without a garbage collector.",
        )),
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
