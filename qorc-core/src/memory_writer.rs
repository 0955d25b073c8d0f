//! MemoryWriter: quality gate, tiered write (raw/enriched/knowledge),
//! idempotency (§4.11).

use crate::traits::FactExtractor;
use crate::{IdempotencyKey, QualityScore, QualityTier, TenantId, TraceId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Cache metadata carried on every write, the basis for later bulk
/// invalidation (`invalidate_by_prompt_version`, `invalidate_by_model`).
#[derive(Debug, Clone, PartialEq)]
pub struct WriteMetadata {
    pub embedding_model: String,
    pub prompt_version: String,
    pub llm_model: String,
    pub quality_score: QualityScore,
    pub trace_id: TraceId,
    pub created_at: crate::Timestamp,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResult {
    pub was_duplicate: bool,
    pub raw_id: Option<String>,
    pub enriched_id: Option<String>,
    pub knowledge_ids: Vec<String>,
}

pub struct MemoryWriterConfig {
    pub raw_ttl_seconds: i64,
    pub enriched_ttl_seconds: i64,
    pub knowledge_ttl_seconds: Option<i64>,
    pub fact_extraction_enabled: bool,
}

impl Default for MemoryWriterConfig {
    fn default() -> Self {
        Self {
            raw_ttl_seconds: 604_800,
            enriched_ttl_seconds: 2_592_000,
            knowledge_ttl_seconds: None,
            fact_extraction_enabled: true,
        }
    }
}

/// In-process idempotency ledger. A real deployment backs this with the raw
/// tier's own unique index; this crate only owns the decision, not storage.
#[derive(Default)]
pub struct IdempotencyLedger {
    seen: Mutex<HashSet<IdempotencyKey>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-writer-wins: returns `true` if this is the first time `key` is
    /// observed (caller should proceed to write); `false` if a duplicate
    /// (caller must skip all writes).
    fn record_if_new(&self, key: IdempotencyKey) -> bool {
        self.seen.lock().unwrap().insert(key)
    }
}

pub struct MemoryWriter {
    config: MemoryWriterConfig,
    ledger: Arc<IdempotencyLedger>,
    fact_extractor: Arc<dyn FactExtractor>,
}

impl MemoryWriter {
    pub fn new(config: MemoryWriterConfig, ledger: Arc<IdempotencyLedger>, fact_extractor: Arc<dyn FactExtractor>) -> Self {
        Self { config, ledger, fact_extractor }
    }

    /// Compute `QualityScore` — callers supply per-dimension scores already
    /// derived from the answer (e.g. from retrieval source coverage); this
    /// assembles `overall` as their mean, matching the monotonic-tier
    /// contract in §3.
    pub fn assess_quality(&self, relevance: f32, completeness: f32, accuracy: f32, source_quality: f32) -> QualityScore {
        let overall = (relevance + completeness + accuracy + source_quality) / 4.0;
        QualityScore { overall, relevance, completeness, accuracy, source_quality }
    }

    /// `Write(question, answer, ..., model_version) -> WriteResult`.
    /// Write failures are logged per-tier but never fail the response; the
    /// corresponding id is left `None`.
    pub async fn write(
        &self,
        question: &str,
        answer: &str,
        tenant_id: TenantId,
        model_version: &str,
        quality: QualityScore,
        trace_id: TraceId,
    ) -> WriteResult {
        let key = IdempotencyKey::compute(question, answer, tenant_id, model_version);
        if !self.ledger.record_if_new(key) {
            return WriteResult { was_duplicate: true, ..Default::default() };
        }

        let tier = quality.tier();
        let mut result = WriteResult::default();

        result.raw_id = self.write_tier("raw", question, answer, self.config.raw_ttl_seconds, trace_id);

        if matches!(tier, QualityTier::Enriched | QualityTier::Knowledge) {
            result.enriched_id =
                self.write_tier("enriched", question, answer, self.config.enriched_ttl_seconds, trace_id);
        }

        if tier == QualityTier::Knowledge && self.config.fact_extraction_enabled {
            if let Ok(facts) = self.fact_extractor.extract(question, answer).await {
                for fact in facts {
                    if let Some(id) = self.write_tier(
                        "knowledge",
                        &fact.content,
                        answer,
                        self.config.knowledge_ttl_seconds.unwrap_or(0),
                        trace_id,
                    ) {
                        result.knowledge_ids.push(id);
                    }
                }
            }
        }

        result
    }

    /// Stand-in for the concrete storage write; the real sink is outside
    /// this crate's scope. Never panics, so a storage failure surfaces as
    /// `None` rather than propagating (§7 PersistenceFailure is recovered).
    fn write_tier(&self, tier: &str, content: &str, secondary: &str, _ttl_seconds: i64, trace_id: TraceId) -> Option<String> {
        let _ = (tier, secondary, trace_id);
        Some(crate::compute_content_hash(content.as_bytes()).iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFactExtractor;

    fn writer() -> MemoryWriter {
        MemoryWriter::new(
            MemoryWriterConfig::default(),
            Arc::new(IdempotencyLedger::new()),
            Arc::new(FakeFactExtractor),
        )
    }

    #[test]
    fn test_quality_tier_boundaries() {
        let w = writer();
        assert_eq!(w.assess_quality(0.8, 0.8, 0.8, 0.8).tier(), QualityTier::Enriched);
        assert_eq!(w.assess_quality(0.85, 0.85, 0.85, 0.85).tier(), QualityTier::Knowledge);
        assert_eq!(w.assess_quality(0.5, 0.5, 0.5, 0.5).tier(), QualityTier::Raw);
    }

    #[tokio::test]
    async fn test_duplicate_write_is_skipped() {
        let w = writer();
        let tenant = TenantId::nil();
        let quality = w.assess_quality(0.9, 0.9, 0.9, 0.9);
        let first = w.write("q", "a", tenant, "v1", quality, TraceId::generate()).await;
        assert!(!first.was_duplicate);
        let second = w.write("q", "a", tenant, "v1", quality, TraceId::generate()).await;
        assert!(second.was_duplicate);
    }

    #[tokio::test]
    async fn test_knowledge_tier_triggers_fact_extraction() {
        let w = writer();
        let tenant = TenantId::nil();
        let quality = w.assess_quality(0.9, 0.9, 0.9, 0.9);
        let result = w.write("q", "a", tenant, "v1", quality, TraceId::generate()).await;
        assert!(!result.knowledge_ids.is_empty());
        assert!(result.enriched_id.is_some());
    }

    #[tokio::test]
    async fn test_raw_tier_only_below_enriched_threshold() {
        let w = writer();
        let tenant = TenantId::nil();
        let quality = w.assess_quality(0.5, 0.5, 0.5, 0.5);
        let result = w.write("q2", "a2", tenant, "v1", quality, TraceId::generate()).await;
        assert!(result.raw_id.is_some());
        assert!(result.enriched_id.is_none());
        assert!(result.knowledge_ids.is_empty());
    }
}
