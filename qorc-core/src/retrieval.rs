//! RetrievalEngine: multi-source parallel search, dedup, CRS ranking,
//! context build, and audit (§4.7) — the largest single component.

use crate::coretrieval::CoRetrievalTracker;
use crate::privacy::{AccessAudit, PrivacyPolicy};
use crate::sanitizer::ContextSanitizer;
use crate::threshold::ThresholdResolver;
use crate::traits::{AuditLog, DataClassification, Embedder, VectorStore, WebSearchProvider};
use crate::{
    Intent, PrivacyLevel, QorcResult, RetrievalMode, RetrievalSource, Role, ScoreBreakdown,
    ScoredResult, SourceType, TenantId, ThresholdSet, TraceId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Fixed ranking weights (§3).
const WEIGHT_SIMILARITY: f32 = 0.40;
const WEIGHT_SOURCE: f32 = 0.20;
const WEIGHT_FRESHNESS: f32 = 0.15;
const WEIGHT_FEEDBACK: f32 = 0.15;
const WEIGHT_DIVERSITY: f32 = 0.10;

/// Source-type multiplier applied to `source_boost` (§4.7 step 6).
fn source_boost(source_type: SourceType, intent: Intent) -> f32 {
    let base = match source_type {
        SourceType::QaPair => 1.30,
        SourceType::ConversationTurn => 1.25,
        SourceType::ConversationThread => 1.10,
        SourceType::Cache => 1.05,
        SourceType::Memory | SourceType::Knowledge => 1.00,
        SourceType::Web => 1.00,
    };
    if source_type == SourceType::Web && is_time_sensitive(intent) {
        base + 0.10
    } else {
        base
    }
}

fn is_time_sensitive(intent: Intent) -> bool {
    matches!(intent, Intent::Research | Intent::Finance)
}

fn is_evergreen(intent: Intent) -> bool {
    matches!(intent, Intent::Analysis | Intent::Creative)
}

fn freshness_score(created_at: crate::Timestamp, now: crate::Timestamp, intent: Intent) -> f32 {
    if is_evergreen(intent) {
        return 0.5;
    }
    let age_days = (now - created_at).num_seconds() as f32 / 86400.0;
    if matches!(intent, Intent::TerminalCommand | Intent::CodeGeneration | Intent::FileOperation) {
        if age_days <= 7.0 {
            1.0
        } else {
            (1.0 - (age_days - 7.0) / 90.0).clamp(0.0, 1.0)
        }
    } else {
        (1.0 - age_days / 180.0).clamp(0.0, 1.0)
    }
}

/// Inputs to a single retrieval call.
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub user_id: &'a str,
    pub role: Role,
    pub tenant_id: TenantId,
    pub intent: Intent,
    pub limit: usize,
    pub augmented_queries: &'a [String],
    pub needs_web_search: bool,
    pub allow_web_search: bool,
    pub conversation_id: Option<&'a str>,
    pub intent_hint: Option<RetrievalMode>,
    pub max_context_chars: usize,
    pub passthrough_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub context: String,
    pub sanitized_context: String,
    pub sources: Vec<ScoredResult>,
    pub cache_hits: usize,
    pub knowledge_hits: usize,
    pub memory_hits: usize,
    pub web_hits: usize,
    pub is_context_clean: bool,
    pub sanitization_count: usize,
    pub retrieval_mode: RetrievalMode,
    pub thresholds_used: ThresholdSet,
    pub associated_items_preloaded: Vec<(String, f64)>,
    pub co_retrieval_recorded: bool,
    pub trace_id: TraceId,
}

pub struct RetrievalEngine {
    thresholds: ThresholdResolver,
    privacy: PrivacyPolicy,
    sanitizer: ContextSanitizer,
    coretrieval: Arc<CoRetrievalTracker>,
    vector_store: Arc<dyn VectorStore>,
    web_search: Arc<dyn WebSearchProvider>,
    embedder: Arc<dyn Embedder>,
    audit: Arc<dyn AuditLog>,
}

impl RetrievalEngine {
    pub fn new(
        coretrieval: Arc<CoRetrievalTracker>,
        vector_store: Arc<dyn VectorStore>,
        web_search: Arc<dyn WebSearchProvider>,
        embedder: Arc<dyn Embedder>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            thresholds: ThresholdResolver::new(),
            privacy: PrivacyPolicy::new(),
            sanitizer: ContextSanitizer::new(),
            coretrieval,
            vector_store,
            web_search,
            embedder,
            audit,
        }
    }

    /// Auto-flush buffered co-retrieval edges when `due`, logging the
    /// drained count. Called inline from `retrieve`; also reachable from
    /// `Orchestrator::shutdown` for the graceful-drain path.
    pub fn flush_co_retrieval(&self, now: crate::Timestamp) -> usize {
        let drained = self.coretrieval.flush(now);
        if !drained.is_empty() {
            tracing::debug!(edges = drained.len(), "flushed co-retrieval edges");
        }
        drained.len()
    }

    pub async fn retrieve(&self, req: RetrievalRequest<'_>, trace_id: TraceId) -> QorcResult<RetrievalResult> {
        let mode = self.thresholds.mode(req.query, req.intent_hint);
        let thresholds = crate::threshold::thresholds_for(mode);
        let filter = self.privacy.build_access_filter(req.role, req.user_id, req.tenant_id);

        let mut all_sources: Vec<RetrievalSource> = Vec::new();
        let mut web_hits = 0usize;

        if req.needs_web_search && req.allow_web_search {
            if let Ok(hits) = self.web_search.search(req.query, 5).await {
                web_hits = hits.len();
                let now = chrono::Utc::now();
                for hit in hits {
                    all_sources.push(RetrievalSource {
                        id: String::new(),
                        content: format!("{}\n{}", hit.title, hit.snippet),
                        similarity: 1.0,
                        source_type: SourceType::Web,
                        privacy_level: PrivacyLevel::Public,
                        owner_id: String::new(),
                        tenant_id: req.tenant_id,
                        created_at: now,
                        metadata: HashMap::from([("url".to_string(), serde_json::json!(hit.url))]),
                    });
                }
            }
        }

        let variations: Vec<&str> = req
            .augmented_queries
            .iter()
            .take(3)
            .map(|s| s.as_str())
            .collect();
        let variations = if variations.is_empty() { vec![req.query] } else { variations };

        for variation in &variations {
            let vector = match self.embedder.embed(variation).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "embedding failed, skipping variation");
                    continue;
                }
            };
            if let Ok(results) = self
                .vector_store
                .semantic_search("cache", &vector, req.limit, None)
                .await
            {
                all_sources.extend(results.into_iter().filter(|r| r.similarity >= thresholds.cache));
            }
            if let Ok(results) = self
                .vector_store
                .semantic_search("knowledge", &vector, req.limit, None)
                .await
            {
                all_sources.extend(results.into_iter().filter(|r| r.similarity >= thresholds.knowledge));
            }
        }

        self.audit
            .log_ingress("vector_store", "semantic_search", all_sources.len(), serde_json::json!({"trace_id": trace_id.to_string()}))
            .await;

        let (filtered, leaks) = self.privacy.filter_results_by_access(&filter, all_sources, |r| {
            (r.privacy_level, r.owner_id.as_str(), r.tenant_id)
        });
        if !leaks.is_empty() {
            warn!(
                count = leaks.len(),
                trace_id = %trace_id,
                "db_filter_leak: storage layer returned rows the access filter had to drop"
            );
            let audit = AccessAudit {
                trace_id: trace_id.to_string(),
                user_id: req.user_id.to_string(),
                role: req.role,
                tenant_id: req.tenant_id,
                tiers_searched: filter.privacy_tiers.clone(),
                results_per_tier: HashMap::new(),
                action: "db_filter_leak".to_string(),
            };
            self.audit
                .log_egress(
                    "privacy_filter",
                    "filter_results_by_access",
                    "none",
                    0,
                    DataClassification::Confidential,
                    serde_json::json!({"leaks": leaks.len(), "audit": serde_json::to_value(&audit).ok()}),
                )
                .await;
        }

        let deduped = dedup_by_id(filtered);

        let now = chrono::Utc::now();
        let mut scored = rank(deduped, req.intent, now);

        let cache_hits = scored.iter().filter(|s| s.source.source_type == SourceType::Cache).count();
        let knowledge_hits = scored.iter().filter(|s| s.source.source_type == SourceType::Knowledge).count();
        let memory_hits = scored.iter().filter(|s| s.source.source_type == SourceType::Memory).count();

        if scored.first().map(|s| s.score).unwrap_or(0.0) < req.passthrough_threshold {
            scored.clear();
        }

        let persisted_edges = self.coretrieval.pending_snapshot(now);
        let mut associated_items_preloaded = Vec::new();
        let mut co_retrieval_recorded = false;
        if let Some(top) = scored.first() {
            if !top.source.id.is_empty() {
                associated_items_preloaded =
                    self.coretrieval.get_associated_items(&top.source.id, &persisted_edges, now, None, None);
            }
        }
        let ids: Vec<String> = scored.iter().map(|s| s.source.id.clone()).filter(|id| !id.is_empty()).collect();
        if !ids.is_empty() {
            let (_, due) = self.coretrieval.record_co_retrieval(&ids, &mode_label(mode), now);
            co_retrieval_recorded = true;
            if due {
                self.flush_co_retrieval(now);
            }
        }

        let context = build_context(&scored, req.max_context_chars);
        let sanitization = self.sanitizer.sanitize(&context);

        Ok(RetrievalResult {
            context,
            sanitized_context: sanitization.sanitized_context,
            sources: scored,
            cache_hits,
            knowledge_hits,
            memory_hits,
            web_hits,
            is_context_clean: sanitization.is_clean,
            sanitization_count: sanitization.detections.len(),
            retrieval_mode: mode,
            thresholds_used: thresholds,
            associated_items_preloaded,
            co_retrieval_recorded,
            trace_id,
        })
    }
}

fn mode_label(mode: RetrievalMode) -> String {
    format!("{mode:?}")
}

/// Deduplicate by id; web sources with empty ids all pass through (§4.7
/// step 5, P8).
fn dedup_by_id(sources: Vec<RetrievalSource>) -> Vec<RetrievalSource> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        if source.is_dedup_exempt() || seen.insert(source.id.clone()) {
            out.push(source);
        }
    }
    out
}

fn rank(sources: Vec<RetrievalSource>, intent: Intent, now: crate::Timestamp) -> Vec<ScoredResult> {
    let mut scored: Vec<ScoredResult> = sources
        .into_iter()
        .map(|source| {
            let breakdown = ScoreBreakdown {
                similarity: source.similarity,
                source_boost: source_boost(source.source_type, intent),
                freshness: freshness_score(source.created_at, now, intent),
                feedback: 0.5,
                diversity: 1.0,
            };
            let score = breakdown.similarity * WEIGHT_SIMILARITY
                + (breakdown.source_boost - 1.0).max(0.0) * WEIGHT_SOURCE
                + breakdown.freshness * WEIGHT_FRESHNESS
                + breakdown.feedback * WEIGHT_FEEDBACK
                + breakdown.diversity * WEIGHT_DIVERSITY;
            ScoredResult { source, score, breakdown }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Token-budgeted context build: web, then knowledge, then cache, then
/// memory (§4.7 step 9). Uses char count as a cheap proxy for tokens.
pub(crate) fn build_context(sources: &[ScoredResult], max_chars: usize) -> String {
    let order = [SourceType::Web, SourceType::Knowledge, SourceType::Cache, SourceType::Memory];
    let mut out = String::new();
    for source_type in order {
        for scored in sources.iter().filter(|s| s.source.source_type == source_type) {
            if out.len() >= max_chars {
                return truncate_marker(out, max_chars);
            }
            let remaining = max_chars.saturating_sub(out.len());
            let chunk: String = scored.source.content.chars().take(remaining).collect();
            out.push_str(&chunk);
            out.push('\n');
        }
    }
    out
}

fn truncate_marker(mut out: String, max_chars: usize) -> String {
    out.truncate(max_chars);
    out.push_str("\n[Context truncated...]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, similarity: f32, source_type: SourceType) -> RetrievalSource {
        RetrievalSource {
            id: id.to_string(),
            content: "content".to_string(),
            similarity,
            source_type,
            privacy_level: PrivacyLevel::Public,
            owner_id: "u1".to_string(),
            tenant_id: TenantId::nil(),
            created_at: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_dedup_keeps_web_ids_exempt() {
        let sources = vec![
            source("a", 0.9, SourceType::Cache),
            source("a", 0.9, SourceType::Cache),
            RetrievalSource { id: String::new(), ..source("", 0.9, SourceType::Web) },
            RetrievalSource { id: String::new(), ..source("", 0.9, SourceType::Web) },
        ];
        let out = dedup_by_id(sources);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_rank_orders_by_score_descending() {
        let sources = vec![source("a", 0.5, SourceType::Memory), source("b", 0.95, SourceType::QaPair)];
        let scored = rank(sources, Intent::General, chrono::Utc::now());
        assert_eq!(scored[0].source.id, "b");
    }

    #[test]
    fn test_build_context_respects_order_and_budget() {
        let sources = vec![
            ScoredResult {
                source: source("a", 0.9, SourceType::Memory),
                score: 0.9,
                breakdown: ScoreBreakdown { similarity: 0.9, source_boost: 1.0, freshness: 1.0, feedback: 0.5, diversity: 1.0 },
            },
            ScoredResult {
                source: RetrievalSource { content: "web content".to_string(), ..source("", 0.9, SourceType::Web) },
                score: 0.9,
                breakdown: ScoreBreakdown { similarity: 0.9, source_boost: 1.1, freshness: 1.0, feedback: 0.5, diversity: 1.0 },
            },
        ];
        let ctx = build_context(&sources, 1000);
        assert!(ctx.find("web content").unwrap() < ctx.find("content").unwrap());
    }

    #[test]
    fn test_build_context_truncation_marker() {
        let sources = vec![ScoredResult {
            source: source("a", 0.9, SourceType::Memory),
            score: 0.9,
            breakdown: ScoreBreakdown { similarity: 0.9, source_boost: 1.0, freshness: 1.0, feedback: 0.5, diversity: 1.0 },
        }];
        let ctx = build_context(&sources, 3);
        assert!(ctx.contains("[Context truncated...]"));
    }
}
