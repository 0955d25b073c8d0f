//! Pluggable oracle contracts (§6). These are the seams where concrete LLM
//! SDKs, vector DB drivers, and web-search providers plug in; this crate
//! only depends on the traits.

use crate::{Intent, RetrievalSource};
use async_trait::async_trait;
use serde_json::Value;

/// `classify(query) -> (intent, confidence)`. Must be pure and fast
/// (<5ms budget). On error, the caller defaults to `(General, 0.5)`.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &str) -> Result<(Intent, f32), String>;
}

/// `augment(query, intent, history?) -> [query]`. Returns 1-5 variations
/// including the original at index 0.
#[async_trait]
pub trait QueryAugmenter: Send + Sync {
    async fn augment(
        &self,
        query: &str,
        intent: Intent,
        history: Option<&str>,
    ) -> Result<Vec<String>, String>;
}

/// `should_search(query) -> (bool, reason)`.
#[async_trait]
pub trait SearchNeedDetector: Send + Sync {
    async fn should_search(&self, query: &str) -> Result<(bool, String), String>;
}

/// A single streamed chunk from an LLM agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentChunk {
    Token(String),
    Done,
}

/// Metadata describing an agent's capabilities and cost model.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMetadata {
    pub best_for: Vec<Intent>,
    pub cost_per_million_input: f64,
    pub cost_per_million_output: f64,
    /// Whether this agent's prompt leaves the process boundary (a hosted
    /// API) as opposed to a local/in-process model. Drives the §4.12 step 8
    /// egress filter: CONFIDENTIAL/LOCAL_ONLY context may only reach
    /// non-external agents.
    pub is_external: bool,
}

/// Any LLM agent: streaming-capable or not. `generate` is the universal
/// fallback; `stream` is preferred when available.
#[async_trait]
pub trait LlmAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, prompt: &str) -> Result<Vec<AgentChunk>, String>;

    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let chunks = self.stream(prompt).await?;
        Ok(chunks
            .into_iter()
            .filter_map(|c| match c {
                AgentChunk::Token(t) => Some(t),
                AgentChunk::Done => None,
            })
            .collect())
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64;
    fn metadata(&self) -> AgentMetadata;
}

/// `semantic_search`/`insert_vector`/`collection_exists`/`count_vectors`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn semantic_search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&crate::FilterExpr>,
    ) -> Result<Vec<RetrievalSource>, String>;

    async fn insert_vector(&self, collection: &str, vector: &[f32], data: Value) -> Result<String, String>;

    async fn collection_exists(&self, name: &str) -> Result<bool, String>;

    async fn count_vectors(&self, name: &str) -> Result<u64, String>;
}

/// One fact extracted from a question/answer pair (§4.11).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub content: String,
    pub confidence: f32,
}

/// `extract(question, answer) -> [fact]`, called only when a write reaches
/// the `knowledge` tier and fact extraction is enabled.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self, question: &str, answer: &str) -> Result<Vec<ExtractedFact>, String>;
}

/// Data classification used in audit-log egress records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    LocalOnly,
}

/// Non-blocking audit sink. Failures here are recovered and logged at WARN
/// (§7 AuditFailure); they never fail the request.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_ingress(&self, source: &str, operation: &str, item_count: usize, metadata: Value);

    async fn log_egress(
        &self,
        source: &str,
        operation: &str,
        destination: &str,
        duration_ms: i64,
        data_classification: DataClassification,
        metadata: Value,
    );
}

/// A single web search hit, pre-`RetrievalSource` shape (no privacy/tenant
/// metadata since it originates outside the tenant's data).
#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web-search provider, capped at 5 results per call by the retrieval
/// pipeline (§4.7 step 2).
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebSearchHit>, String>;
}

/// Embeds text into the vector space `VectorStore` searches over. Swapping
/// this out (e.g. for a different model) is a data-migration concern outside
/// this crate; it only depends on the shape.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Canonical content for a response, returned outside `content` when a
/// direct-data handler answers without an LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectDataResponse {
    pub content: String,
    pub source: String,
}

/// Direct-data shortcut (§4.12 step 5): certain `(intent, query)` shapes
/// (topic-summary memory queries, email, finance) are answered from a
/// canonical data source instead of an LLM prompt. Returning `None` falls
/// through to the normal retrieval + generation path.
#[async_trait]
pub trait DirectDataHandler: Send + Sync {
    async fn handle(&self, intent: Intent, query: &str) -> Option<DirectDataResponse>;
}
