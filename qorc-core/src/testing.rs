//! In-memory fakes and spies for the pluggable oracle traits, feature-gated
//! the way `MockStorage` is in the teacher storage crate. Used by this
//! crate's own unit/property tests and available to downstream crates under
//! `test-util`.

use crate::traits::{
    AgentChunk, AgentMetadata, AuditLog, DataClassification, DirectDataHandler, DirectDataResponse,
    Embedder, ExtractedFact, FactExtractor, IntentClassifier, LlmAgent, QueryAugmenter,
    SearchNeedDetector, VectorStore, WebSearchHit, WebSearchProvider,
};
use crate::{FilterExpr, Intent, RetrievalSource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fixed or erroring intent classifier.
pub struct FakeIntentClassifier {
    result: Option<(Intent, f32)>,
    calls: AtomicUsize,
}

impl FakeIntentClassifier {
    pub fn fixed(intent: Intent, confidence: f32) -> Self {
        Self { result: Some((intent, confidence)), calls: AtomicUsize::new(0) }
    }
    pub fn erroring() -> Self {
        Self { result: None, calls: AtomicUsize::new(0) }
    }
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentClassifier for FakeIntentClassifier {
    async fn classify(&self, _query: &str) -> Result<(Intent, f32), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.ok_or_else(|| "classification failed".to_string())
    }
}

/// Returns the query unchanged as the sole variation.
pub struct FakeAugmenter;

impl FakeAugmenter {
    pub fn identity() -> Self {
        Self
    }
}

#[async_trait]
impl QueryAugmenter for FakeAugmenter {
    async fn augment(&self, query: &str, _intent: Intent, _history: Option<&str>) -> Result<Vec<String>, String> {
        Ok(vec![query.to_string()])
    }
}

/// Always returns a fixed search-need verdict; counts calls (used by P1's
/// preflight-before-egress spy assertions).
pub struct FakeSearchDetector {
    verdict: bool,
    calls: AtomicUsize,
}

impl FakeSearchDetector {
    pub fn always(verdict: bool) -> Self {
        Self { verdict, calls: AtomicUsize::new(0) }
    }
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchNeedDetector for FakeSearchDetector {
    async fn should_search(&self, _query: &str) -> Result<(bool, String), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.verdict, "fake detector".to_string()))
    }
}

/// Spy LLM agent: can be made to fail N times before succeeding, to drive
/// circuit-breaker and fallback tests.
pub struct FakeLlmAgent {
    name: String,
    fail_count: Mutex<u32>,
    calls: AtomicUsize,
    response: String,
    is_external: bool,
}

impl FakeLlmAgent {
    pub fn always_succeeds(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_count: Mutex::new(0),
            calls: AtomicUsize::new(0),
            response: response.into(),
            is_external: true,
        }
    }

    pub fn fails_n_times(name: impl Into<String>, n: u32, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_count: Mutex::new(n),
            calls: AtomicUsize::new(0),
            response: response.into(),
            is_external: true,
        }
    }

    /// Same as [`Self::always_succeeds`] but flagged non-external, for
    /// exercising the egress filter's "local agent" branch.
    pub fn local(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_count: Mutex::new(0),
            calls: AtomicUsize::new(0),
            response: response.into(),
            is_external: false,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmAgent for FakeLlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, _prompt: &str) -> Result<Vec<AgentChunk>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut remaining = self.fail_count.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(format!("{} is down", self.name));
        }
        Ok(vec![AgentChunk::Token(self.response.clone()), AgentChunk::Done])
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 + output_tokens as f64) * 0.000001
    }

    fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            best_for: vec![Intent::General],
            cost_per_million_input: 1.0,
            cost_per_million_output: 2.0,
            is_external: self.is_external,
        }
    }
}

/// In-memory vector store backed by a `Vec`, for retrieval pipeline tests.
pub struct FakeVectorStore {
    records: Mutex<Vec<RetrievalSource>>,
    calls: AtomicUsize,
}

impl FakeVectorStore {
    pub fn seeded(records: Vec<RetrievalSource>) -> Self {
        Self { records: Mutex::new(records), calls: AtomicUsize::new(0) }
    }
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn semantic_search(
        &self,
        _collection: &str,
        _query_vector: &[f32],
        limit: usize,
        _filter: Option<&FilterExpr>,
    ) -> Result<Vec<RetrievalSource>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        Ok(records.iter().take(limit).cloned().collect())
    }

    async fn insert_vector(&self, _collection: &str, _vector: &[f32], _data: Value) -> Result<String, String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn collection_exists(&self, _name: &str) -> Result<bool, String> {
        Ok(true)
    }

    async fn count_vectors(&self, _name: &str) -> Result<u64, String> {
        Ok(self.records.lock().unwrap().len() as u64)
    }
}

/// Always returns a single fixed fact.
pub struct FakeFactExtractor;

#[async_trait]
impl FactExtractor for FakeFactExtractor {
    async fn extract(&self, _question: &str, _answer: &str) -> Result<Vec<ExtractedFact>, String> {
        Ok(vec![ExtractedFact { content: "fake fact".to_string(), confidence: 0.9 }])
    }
}

/// Records every ingress/egress call for P1/P2 spy assertions.
#[derive(Default)]
pub struct SpyAuditLog {
    pub ingress_calls: AtomicUsize,
    pub egress_calls: AtomicUsize,
}

#[async_trait]
impl AuditLog for SpyAuditLog {
    async fn log_ingress(&self, _source: &str, _operation: &str, _item_count: usize, _metadata: Value) {
        self.ingress_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn log_egress(
        &self,
        _source: &str,
        _operation: &str,
        _destination: &str,
        _duration_ms: i64,
        _data_classification: DataClassification,
        _metadata: Value,
    ) {
        self.egress_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spy web-search provider; counts calls so P1 can assert zero invocations
/// on a preflight block.
pub struct SpyWebSearchProvider {
    calls: AtomicUsize,
    hits: Vec<WebSearchHit>,
}

impl SpyWebSearchProvider {
    pub fn seeded(hits: Vec<WebSearchHit>) -> Self {
        Self { calls: AtomicUsize::new(0), hits }
    }
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearchProvider for SpyWebSearchProvider {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<WebSearchHit>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Deterministic, content-derived embedding: a byte-sum-seeded vector, never
/// the zero vector two different inputs would otherwise collide on.
pub struct FakeEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims, calls: AtomicUsize::new(0) }
    }
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seed: u32 = text.bytes().fold(1u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        Ok((0..self.dims)
            .map(|i| {
                let v = seed.wrapping_add(i as u32 * 2654435761);
                (v as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect())
    }
}

/// Returns a fixed response per intent; `None` for any intent not seeded
/// (falls through to normal retrieval + generation).
pub struct FakeDirectDataHandler {
    responses: HashMap<Intent, DirectDataResponse>,
}

impl FakeDirectDataHandler {
    pub fn none() -> Self {
        Self { responses: HashMap::new() }
    }

    pub fn seeded(responses: HashMap<Intent, DirectDataResponse>) -> Self {
        Self { responses }
    }
}

#[async_trait]
impl DirectDataHandler for FakeDirectDataHandler {
    async fn handle(&self, intent: Intent, _query: &str) -> Option<DirectDataResponse> {
        self.responses.get(&intent).cloned()
    }
}
