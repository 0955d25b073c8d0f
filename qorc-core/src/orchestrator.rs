//! Orchestrator: composes every component into the `Execute(Request) ->
//! Stream<Event>` pipeline (§4.12), with deterministic event ordering and
//! exactly one terminal event per request (P7).

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::coretrieval::CoRetrievalTracker;
use crate::llm::{AgentEvent, LlmCoordinator};
use crate::memory_writer::MemoryWriter;
use crate::planner::QueryPlanner;
use crate::preflight::PreflightGate;
use crate::privacy::PrivacyPolicy;
use crate::rate_limiter::{RateLimitVerdict, RateLimiter};
use crate::retrieval::{RetrievalEngine, RetrievalRequest, RetrievalResult};
use crate::sanitizer::ContextSanitizer;
use crate::traits::DirectDataHandler;
use crate::{CacheStatus, Event, PreflightDecision, QueryId, Request, TenantId, TraceId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

/// Tunables that don't belong to any single component (§6 configuration
/// table subset consumed directly by the orchestrator).
pub struct OrchestratorTuning {
    pub max_context_chars: usize,
    pub passthrough_threshold: f32,
    pub system_prompt: String,
    pub model_version: String,
}

impl Default for OrchestratorTuning {
    fn default() -> Self {
        Self {
            max_context_chars: 4000,
            passthrough_threshold: 0.55,
            system_prompt: "You are a helpful assistant.".to_string(),
            model_version: "v1".to_string(),
        }
    }
}

/// Composes every component. Holds only `Arc`s to shared services so it is
/// cheap to clone into a spawned task per request.
#[derive(Clone)]
pub struct Orchestrator {
    preflight: Arc<PreflightGate>,
    rate_limiter: Arc<RateLimiter>,
    planner: Arc<QueryPlanner>,
    retrieval: Arc<RetrievalEngine>,
    llm: Arc<LlmCoordinator>,
    memory_writer: Arc<MemoryWriter>,
    privacy: Arc<PrivacyPolicy>,
    #[allow(dead_code)]
    breakers: Arc<CircuitBreakerRegistry>,
    coretrieval: Arc<CoRetrievalTracker>,
    direct_data: Arc<dyn DirectDataHandler>,
    tuning: Arc<OrchestratorTuning>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preflight: Arc<PreflightGate>,
        rate_limiter: Arc<RateLimiter>,
        planner: Arc<QueryPlanner>,
        retrieval: Arc<RetrievalEngine>,
        llm: Arc<LlmCoordinator>,
        memory_writer: Arc<MemoryWriter>,
        privacy: Arc<PrivacyPolicy>,
        breakers: Arc<CircuitBreakerRegistry>,
        coretrieval: Arc<CoRetrievalTracker>,
        direct_data: Arc<dyn DirectDataHandler>,
        tuning: OrchestratorTuning,
    ) -> Self {
        Self {
            preflight,
            rate_limiter,
            planner,
            retrieval,
            llm,
            memory_writer,
            privacy,
            breakers,
            coretrieval,
            direct_data,
            tuning: Arc::new(tuning),
        }
    }

    /// Graceful-shutdown hook (§5, §9): drains any buffered co-retrieval
    /// edges before the process exits. Idempotent; safe to call even if
    /// nothing is pending.
    pub async fn shutdown(&self) {
        let now = chrono::Utc::now();
        let drained = self.coretrieval.flush(now);
        if !drained.is_empty() {
            info!(edges = drained.len(), "drained pending co-retrieval edges on shutdown");
        }
    }

    /// `Execute(Request) -> Stream<Event>`. Spawns the pipeline as a
    /// detached task and streams events back over a bounded channel;
    /// backpressure comes from the channel capacity, and a client
    /// disconnect (receiver dropped) cancels the remaining pipeline on the
    /// next send.
    pub fn execute(&self, request: Request) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(32);
        let orchestrator = self.clone();
        let trace_id = TraceId::generate();
        let span = info_span!("orchestrator.execute", trace_id = %trace_id, user_id = %request.user_id);
        tokio::spawn(async move { orchestrator.run(request, trace_id, tx).await }.instrument(span));
        rx
    }

    async fn run(&self, request: Request, trace_id: TraceId, tx: mpsc::Sender<Event>) {
        if let Err(reason) = request.validate() {
            let _ = tx
                .send(Event::Error {
                    trace_id,
                    step: "validation".to_string(),
                    message: reason,
                    reason: None,
                    details: HashMap::new(),
                })
                .await;
            return;
        }

        info!("request ingress");

        let preflight_result = self.preflight.check(&request.query);
        if preflight_result.decision == PreflightDecision::Block {
            self.rate_limiter.check_and_record(&request.user_id, true);
            let _ = tx
                .send(Event::Error {
                    trace_id,
                    step: "preflight_gate".to_string(),
                    message: preflight_result.reason.clone().unwrap_or_default(),
                    reason: preflight_result.detections.first().map(|d| format!("{:?}", d.kind)),
                    details: HashMap::new(),
                })
                .await;
            return;
        }

        match self.rate_limiter.check_only(&request.user_id) {
            RateLimitVerdict::Denied { retry_after_secs } => {
                let mut details = HashMap::new();
                details.insert("retry_after".to_string(), serde_json::json!(retry_after_secs));
                details.insert("window_seconds".to_string(), serde_json::json!(60));
                let _ = tx
                    .send(Event::Error {
                        trace_id,
                        step: "rate_limit".to_string(),
                        message: "rate limit exceeded".to_string(),
                        reason: None,
                        details,
                    })
                    .await;
                return;
            }
            RateLimitVerdict::Allowed => {
                self.rate_limiter.check_and_record(&request.user_id, false);
            }
        }

        let _ = tx
            .send(Event::Status {
                trace_id,
                step: "query_planning".to_string(),
                message: "planning query".to_string(),
                details: HashMap::new(),
            })
            .await;

        let started_at = std::time::Instant::now();

        let plan = self
            .planner
            .plan(
                &request.query,
                &preflight_result.sanitized_query,
                preflight_result.allow_web_search,
                request.thread_context.as_deref(),
                trace_id,
            )
            .await;

        let mut intent_details = HashMap::new();
        intent_details.insert("intent".to_string(), serde_json::json!(plan.intent));
        intent_details.insert("confidence".to_string(), serde_json::json!(plan.intent_confidence));
        let _ = tx
            .send(Event::Status {
                trace_id,
                step: "intent_detection".to_string(),
                message: format!("detected intent {:?} (confidence {:.2})", plan.intent, plan.intent_confidence),
                details: intent_details,
            })
            .await;

        // §4.12 step 5: certain intents are answered from a canonical data
        // source, bypassing retrieval and LLM generation entirely.
        if let Some(direct) = self.direct_data.handle(plan.intent, &plan.sanitized_query).await {
            let mut details = HashMap::new();
            details.insert("source".to_string(), serde_json::json!(direct.source));
            let _ = tx
                .send(Event::Status {
                    trace_id,
                    step: "data_handler".to_string(),
                    message: format!("answered directly from {}", direct.source),
                    details,
                })
                .await;
            let _ = tx.send(Event::Chunk { trace_id, text: direct.content.clone() }).await;

            let writer = self.memory_writer.clone();
            let question = request.query.clone();
            let answer = direct.content.clone();
            let tenant_id = request.tenant_id;
            let model_version = self.tuning.model_version.clone();
            tokio::spawn(async move {
                // Canonical, deterministically-sourced content is treated as
                // maximal quality on every dimension; there's no retrieval
                // score or agent confidence to weigh it against.
                let quality = writer.assess_quality(1.0, 1.0, 1.0, 1.0);
                writer.write(&question, &answer, tenant_id, &model_version, quality, trace_id).await;
            });

            let query_id = QueryId::now_v7();
            let _ = tx
                .send(Event::Done {
                    trace_id,
                    query_id,
                    response: direct.content,
                    agent_used: direct.source,
                    intent_detected: plan.intent,
                    cache_status: CacheStatus { from_cache: false },
                    cost_usd: 0.0,
                    latency_ms: started_at.elapsed().as_millis() as i64,
                })
                .await;
            return;
        }

        let retrieval_request = RetrievalRequest {
            query: &plan.sanitized_query,
            user_id: &request.user_id,
            role: request.role,
            tenant_id: request.tenant_id,
            intent: plan.intent,
            limit: request.context_limit as usize,
            augmented_queries: &plan.augmented_queries,
            needs_web_search: plan.needs_web_search,
            allow_web_search: plan.allow_web_search,
            conversation_id: request.conversation_id.as_deref(),
            intent_hint: None,
            max_context_chars: self.tuning.max_context_chars,
            passthrough_threshold: self.tuning.passthrough_threshold,
        };

        let retrieval_result = match self.retrieval.retrieve(retrieval_request, trace_id).await {
            Ok(result) => result,
            Err(err) => {
                let _ = tx
                    .send(Event::Error {
                        trace_id,
                        step: "retrieval".to_string(),
                        message: "retrieval failed".to_string(),
                        reason: Some(err.to_string()),
                        details: HashMap::new(),
                    })
                    .await;
                return;
            }
        };

        if plan.needs_web_search && plan.allow_web_search {
            let mut details = HashMap::new();
            details.insert("hits".to_string(), serde_json::json!(retrieval_result.web_hits));
            let _ = tx
                .send(Event::Status {
                    trace_id,
                    step: "web_search".to_string(),
                    message: format!("web search returned {} hit(s)", retrieval_result.web_hits),
                    details,
                })
                .await;
        }

        let _ = tx
            .send(Event::Status {
                trace_id,
                step: "context_assembly".to_string(),
                message: format!(
                    "assembled context from {} sources",
                    retrieval_result.sources.len()
                ),
                details: HashMap::new(),
            })
            .await;

        let mut sanitization_details = HashMap::new();
        sanitization_details.insert("detections".to_string(), serde_json::json!(retrieval_result.sanitization_count));
        sanitization_details.insert("is_clean".to_string(), serde_json::json!(retrieval_result.is_context_clean));
        let _ = tx
            .send(Event::Status {
                trace_id,
                step: "context_sanitization".to_string(),
                message: if retrieval_result.is_context_clean {
                    "retrieved context was clean".to_string()
                } else {
                    format!("sanitized {} pattern(s) from retrieved context", retrieval_result.sanitization_count)
                },
                details: sanitization_details,
            })
            .await;

        // §4.12 step 8: CONFIDENTIAL/LOCAL_ONLY content may never reach a
        // non-local (external) agent's prompt.
        let resolved_agent = self.llm.resolve_agent_name(plan.intent, request.manual_agent.as_deref());
        let sanitized_context = if self.llm.agent_is_external(&resolved_agent) {
            self.strip_non_egressable(&retrieval_result)
        } else {
            retrieval_result.sanitized_context.clone()
        };

        let prompt = self
            .llm
            .build_prompt(&self.tuning.system_prompt, &sanitized_context, &request.query);

        let agent_events = self
            .llm
            .stream(plan.intent, request.manual_agent.as_deref(), &prompt)
            .await;

        let agent_events = match agent_events {
            Ok(events) => events,
            Err(err) => {
                let _ = tx
                    .send(Event::Error {
                        trace_id,
                        step: "agent_execution".to_string(),
                        message: err.to_string(),
                        reason: None,
                        details: HashMap::new(),
                    })
                    .await;
                return;
            }
        };

        let mut final_response = String::new();
        let mut agent_used = String::new();
        for event in agent_events {
            match event {
                AgentEvent::Started { agent } => agent_used = agent,
                AgentEvent::Token { content, agent, .. } => {
                    agent_used = agent.clone();
                    let _ = tx.send(Event::Chunk { trace_id, text: content }).await;
                }
                AgentEvent::Thinking { content, agent } => {
                    agent_used = agent.clone();
                    let mut details = HashMap::new();
                    details.insert("agent".to_string(), serde_json::json!(agent));
                    let _ = tx
                        .send(Event::Status {
                            trace_id,
                            step: "agent_fallback".to_string(),
                            message: content,
                            details,
                        })
                        .await;
                }
                AgentEvent::Completed { content, agent, is_final, .. } => {
                    agent_used = agent;
                    if is_final {
                        final_response = content;
                    }
                }
                AgentEvent::Error { .. } => {}
            }
        }

        let query_id = QueryId::now_v7();
        let latency_ms = started_at.elapsed().as_millis() as i64;
        let cost_usd = 0.0;

        // §4.11 quality gate inputs, derived from real retrieval/planning
        // signals rather than fixed constants.
        let relevance = retrieval_result.sources.first().map(|s| s.score).unwrap_or(0.0).clamp(0.0, 1.0);
        let completeness = (retrieval_result.sources.len() as f32 / 5.0).clamp(0.0, 1.0);
        let accuracy = plan.intent_confidence.clamp(0.0, 1.0);
        let source_quality = if retrieval_result.sources.is_empty() {
            0.0
        } else {
            let trusted = retrieval_result
                .sources
                .iter()
                .filter(|s| {
                    matches!(
                        s.source.source_type,
                        crate::SourceType::Knowledge | crate::SourceType::QaPair | crate::SourceType::Memory
                    )
                })
                .count();
            trusted as f32 / retrieval_result.sources.len() as f32
        };

        let writer = self.memory_writer.clone();
        let question = request.query.clone();
        let answer = final_response.clone();
        let tenant_id = request.tenant_id;
        let model_version = self.tuning.model_version.clone();
        tokio::spawn(async move {
            let quality = writer.assess_quality(relevance, completeness, accuracy, source_quality);
            writer.write(&question, &answer, tenant_id, &model_version, quality, trace_id).await;
        });

        let _ = tx
            .send(Event::Done {
                trace_id,
                query_id,
                response: final_response,
                agent_used,
                intent_detected: plan.intent,
                cache_status: CacheStatus { from_cache: false },
                cost_usd,
                latency_ms,
            })
            .await;
    }

    /// §4.12 step 8: drop any source whose privacy level the policy says may
    /// not leave the process, then rebuild and re-sanitize the context from
    /// what remains.
    fn strip_non_egressable(&self, retrieval_result: &RetrievalResult) -> String {
        let egressable: Vec<_> = retrieval_result
            .sources
            .iter()
            .filter(|s| self.privacy.should_send_to_external_api(s.source.privacy_level))
            .cloned()
            .collect();
        let context = crate::retrieval::build_context(&egressable, self.tuning.max_context_chars);
        ContextSanitizer::new().sanitize(&context).sanitized_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_writer::{IdempotencyLedger, MemoryWriterConfig};
    use crate::planner::QueryPlannerConfig;
    use crate::testing::{
        FakeAugmenter, FakeDirectDataHandler, FakeEmbedder, FakeFactExtractor, FakeIntentClassifier,
        FakeLlmAgent, FakeSearchDetector, FakeVectorStore, SpyAuditLog, SpyWebSearchProvider,
    };
    use crate::llm::TableAgentSelector;
    use crate::{Intent, Role};
    use std::time::Duration;

    fn test_orchestrator() -> Orchestrator {
        let preflight = Arc::new(PreflightGate::new());
        let rate_limiter = Arc::new(RateLimiter::new(100, 5, 60));
        let planner = Arc::new(QueryPlanner::new(
            QueryPlannerConfig::default(),
            Arc::new(FakeIntentClassifier::fixed(Intent::General, 0.9)),
            Arc::new(FakeAugmenter::identity()),
            Arc::new(FakeSearchDetector::always(false)),
        ));
        let coretrieval = Arc::new(CoRetrievalTracker::new(Default::default()));
        let retrieval = Arc::new(RetrievalEngine::new(
            coretrieval.clone(),
            Arc::new(FakeVectorStore::seeded(vec![])),
            Arc::new(SpyWebSearchProvider::seeded(vec![])),
            Arc::new(FakeEmbedder::default()),
            Arc::new(SpyAuditLog::default()),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30), 2));
        let mut agents: HashMap<String, Arc<dyn crate::traits::LlmAgent>> = HashMap::new();
        agents.insert("default".to_string(), Arc::new(FakeLlmAgent::always_succeeds("default", "hello")));
        let llm = Arc::new(LlmCoordinator::new(
            agents,
            vec!["default".to_string()],
            breakers.clone(),
            Arc::new(TableAgentSelector::new(HashMap::new(), "default")),
            "default",
            4000,
        ));
        let memory_writer = Arc::new(MemoryWriter::new(
            MemoryWriterConfig::default(),
            Arc::new(IdempotencyLedger::new()),
            Arc::new(FakeFactExtractor),
        ));
        Orchestrator::new(
            preflight,
            rate_limiter,
            planner,
            retrieval,
            llm,
            memory_writer,
            Arc::new(PrivacyPolicy::new()),
            breakers,
            coretrieval,
            Arc::new(FakeDirectDataHandler::none()),
            OrchestratorTuning::default(),
        )
    }

    #[tokio::test]
    async fn test_blocked_query_emits_single_error_and_terminates() {
        let orchestrator = test_orchestrator();
        let request = Request {
            query: "my ssn is 123-45-6789".to_string(),
            user_id: "u1".to_string(),
            tenant_id: TenantId::nil(),
            role: Role::Member,
            manual_agent: None,
            context_limit: 5,
            bypass_cache: false,
            conversation_id: None,
            thread_context: None,
            file_context: None,
        };
        let mut rx = orchestrator.execute(request);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Error { ref step, .. } if step == "preflight_gate"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_clean_query_reaches_done() {
        let orchestrator = test_orchestrator();
        let request = Request {
            query: "What is the weather like?".to_string(),
            user_id: "u2".to_string(),
            tenant_id: TenantId::nil(),
            role: Role::Member,
            manual_agent: None,
            context_limit: 5,
            bypass_cache: false,
            conversation_id: None,
            thread_context: None,
            file_context: None,
        };
        let mut rx = orchestrator.execute(request);
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Done { .. }) {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    /// Echoes the prompt it receives back as the response, so a test can
    /// inspect what actually reached the "external" agent.
    struct EchoAgent;

    #[async_trait::async_trait]
    impl crate::traits::LlmAgent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn stream(&self, prompt: &str) -> Result<Vec<crate::traits::AgentChunk>, String> {
            Ok(vec![crate::traits::AgentChunk::Token(prompt.to_string()), crate::traits::AgentChunk::Done])
        }

        fn estimate_cost(&self, _input_tokens: u32, _output_tokens: u32) -> f64 {
            0.0
        }

        fn metadata(&self) -> crate::traits::AgentMetadata {
            crate::traits::AgentMetadata {
                best_for: vec![Intent::General],
                cost_per_million_input: 1.0,
                cost_per_million_output: 1.0,
                is_external: true,
            }
        }
    }

    #[tokio::test]
    async fn test_confidential_source_never_reaches_external_agent_prompt() {
        use crate::{PrivacyLevel, RetrievalSource, SourceType};

        let preflight = Arc::new(PreflightGate::new());
        let rate_limiter = Arc::new(RateLimiter::new(100, 5, 60));
        let planner = Arc::new(QueryPlanner::new(
            QueryPlannerConfig::default(),
            Arc::new(FakeIntentClassifier::fixed(Intent::General, 0.9)),
            Arc::new(FakeAugmenter::identity()),
            Arc::new(FakeSearchDetector::always(false)),
        ));
        let coretrieval = Arc::new(CoRetrievalTracker::new(Default::default()));
        let confidential_source = RetrievalSource {
            id: "secret-1".to_string(),
            content: "TOP-SECRET-PAYLOAD".to_string(),
            similarity: 0.99,
            source_type: SourceType::Knowledge,
            privacy_level: PrivacyLevel::Confidential,
            owner_id: "admin-1".to_string(),
            tenant_id: TenantId::nil(),
            created_at: chrono::Utc::now(),
            metadata: HashMap::new(),
        };
        let retrieval = Arc::new(RetrievalEngine::new(
            coretrieval.clone(),
            Arc::new(FakeVectorStore::seeded(vec![confidential_source])),
            Arc::new(SpyWebSearchProvider::seeded(vec![])),
            Arc::new(FakeEmbedder::default()),
            Arc::new(SpyAuditLog::default()),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30), 2));
        let mut agents: HashMap<String, Arc<dyn crate::traits::LlmAgent>> = HashMap::new();
        agents.insert("echo".to_string(), Arc::new(EchoAgent));
        let llm = Arc::new(LlmCoordinator::new(
            agents,
            vec!["echo".to_string()],
            breakers.clone(),
            Arc::new(TableAgentSelector::new(HashMap::new(), "echo")),
            "echo",
            4000,
        ));
        let memory_writer = Arc::new(MemoryWriter::new(
            MemoryWriterConfig::default(),
            Arc::new(IdempotencyLedger::new()),
            Arc::new(FakeFactExtractor),
        ));
        let orchestrator = Orchestrator::new(
            preflight,
            rate_limiter,
            planner,
            retrieval,
            llm,
            memory_writer,
            Arc::new(PrivacyPolicy::new()),
            breakers,
            coretrieval,
            Arc::new(FakeDirectDataHandler::none()),
            OrchestratorTuning::default(),
        );

        let request = Request {
            query: "what do we know about the project".to_string(),
            user_id: "admin-1".to_string(),
            tenant_id: TenantId::nil(),
            role: Role::Admin,
            manual_agent: None,
            context_limit: 5,
            bypass_cache: false,
            conversation_id: None,
            thread_context: None,
            file_context: None,
        };
        let mut rx = orchestrator.execute(request);
        let mut response = String::new();
        while let Some(event) = rx.recv().await {
            if let Event::Done { response: r, .. } = event {
                response = r;
            }
        }
        assert!(!response.contains("TOP-SECRET-PAYLOAD"));
    }
}
