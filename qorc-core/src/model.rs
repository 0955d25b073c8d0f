//! Request/response data model shared by every component (§3 of the design).

use crate::{QueryId, TenantId, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// REQUEST
// ============================================================================

/// Inbound request to `Orchestrator::execute`.
///
/// Invariant: `query` is non-empty after trimming (enforced by
/// [`Request::validate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Request {
    pub query: String,
    pub user_id: String,
    pub tenant_id: TenantId,
    pub role: Role,
    pub manual_agent: Option<String>,
    /// Maximum number of retrieval sources to fold into context, 1..=20.
    pub context_limit: u8,
    pub bypass_cache: bool,
    pub conversation_id: Option<String>,
    pub thread_context: Option<String>,
    pub file_context: Option<String>,
}

impl Request {
    /// Non-empty-after-trim and `context_limit` range checks.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must be non-empty after trimming".to_string());
        }
        if !(1..=20).contains(&self.context_limit) {
            return Err("context_limit must be in [1, 20]".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Total order of data sensitivity, except `LocalOnly` which is owner-only
/// regardless of role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivacyLevel {
    Public,
    Internal,
    Confidential,
    LocalOnly,
}

/// Requesting user's role. `viewer`/`lead`/`manager` are accepted at the
/// filter layer and normalize to the nearest of the three authoritative
/// tiers (see [`crate::privacy::PrivacyPolicy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Public,
    Viewer,
    Member,
    Lead,
    Manager,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "public" => Role::Public,
            "viewer" => Role::Viewer,
            "member" => Role::Member,
            "lead" => Role::Lead,
            "manager" => Role::Manager,
            "admin" => Role::Admin,
            _ => return Err(()),
        })
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Public => "public",
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Lead => "lead",
            Role::Manager => "manager",
            Role::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

/// Query intent, used for agent routing and threshold selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TerminalCommand,
    CodeGeneration,
    FileOperation,
    Analysis,
    Creative,
    Research,
    MemoryQuery,
    Email,
    Finance,
    /// Fallback used when the pluggable classifier errors.
    General,
}

/// Drives adaptive-threshold selection (pattern separation vs. completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    ExactRecall,
    ConceptualExplore,
    Troubleshoot,
    Compare,
    Default,
}

/// Source-type tag for a retrieved item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Cache,
    Knowledge,
    Memory,
    Web,
    QaPair,
    ConversationTurn,
    ConversationThread,
}

/// Memory-write quality tier, derived monotonically from `QualityScore.overall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Raw,
    Enriched,
    Knowledge,
}

/// `CircuitBreaker` state (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Preflight classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PreflightDecision {
    Allow,
    AllowMasked,
    Block,
    RateLimited,
}

/// Detection severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Kind of PII/secret/injection detected by the preflight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    ApiKey,
    Password,
    CreditCard,
    Ssn,
    Email,
    Phone,
    IpAddress,
    PromptInjection,
    SqlInjection,
    CommandInjection,
}

impl DetectionType {
    /// Severity fixed per kind, per the detection-rules table in §4.1.
    pub fn severity(self) -> Severity {
        use DetectionType::*;
        match self {
            ApiKey | Password | CreditCard | Ssn | SqlInjection | CommandInjection => {
                Severity::High
            }
            Email | Phone => Severity::Medium,
            IpAddress => Severity::Low,
            PromptInjection => Severity::Medium,
        }
    }

    /// First-high-severity-kind user-facing remediation message (§4.1
    /// Error-mapping). The original query is never echoed back.
    pub fn block_message(self) -> &'static str {
        match self {
            DetectionType::Ssn => "Please remove the Social Security Number from your query.",
            DetectionType::CreditCard => "Please remove payment information from your query.",
            DetectionType::ApiKey => "Please remove the API key or secret from your query.",
            DetectionType::Password => "Please remove the password from your query.",
            DetectionType::SqlInjection => "Your query contains a pattern that looks like SQL injection.",
            DetectionType::CommandInjection => {
                "Your query contains a pattern that looks like command injection."
            }
            DetectionType::Email => "Please remove the email address from your query.",
            DetectionType::Phone => "Please remove the phone number from your query.",
            DetectionType::IpAddress => "Please remove the IP address from your query.",
            DetectionType::PromptInjection => {
                "Your query was sanitized because it resembled an instruction-override attempt."
            }
        }
    }
}

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Similarity thresholds for the three search tiers. Invariant:
/// `cache >= raw >= knowledge` (P9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ThresholdSet {
    pub cache: f32,
    pub raw: f32,
    pub knowledge: f32,
}

impl ThresholdSet {
    /// P9: `cache >= raw >= knowledge`.
    pub fn is_ordered(&self) -> bool {
        self.cache >= self.raw && self.raw >= self.knowledge
    }
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// A single item returned by a search tier. Identity is `id`; web sources may
/// carry an empty id and are exempt from dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RetrievalSource {
    pub id: String,
    pub content: String,
    pub similarity: f32,
    pub source_type: SourceType,
    pub privacy_level: PrivacyLevel,
    pub owner_id: String,
    pub tenant_id: TenantId,
    pub created_at: crate::Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievalSource {
    /// Web sources have no stable id and are exempt from dedup (§4.7 step 5).
    pub fn is_dedup_exempt(&self) -> bool {
        self.source_type == SourceType::Web && self.id.is_empty()
    }
}

/// Per-signal ranking breakdown, summed with fixed weights to produce `score`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ScoreBreakdown {
    pub similarity: f32,
    pub source_boost: f32,
    pub freshness: f32,
    pub feedback: f32,
    pub diversity: f32,
}

/// A [`RetrievalSource`] plus its computed rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ScoredResult {
    #[serde(flatten)]
    pub source: RetrievalSource,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

/// Quality assessment driving the memory-write tier decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QualityScore {
    pub overall: f32,
    pub relevance: f32,
    pub completeness: f32,
    pub accuracy: f32,
    pub source_quality: f32,
}

impl QualityScore {
    /// Tier decision is monotonic in `overall`: `>= 0.85` knowledge,
    /// `>= 0.80` enriched, else raw.
    pub fn tier(&self) -> QualityTier {
        if self.overall >= 0.85 {
            QualityTier::Knowledge
        } else if self.overall >= 0.80 {
            QualityTier::Enriched
        } else {
            QualityTier::Raw
        }
    }
}

// ============================================================================
// IDEMPOTENCY
// ============================================================================

/// 256-bit hash of `(question | answer | tenant_id | model_version)`, used to
/// suppress duplicate tiered writes (P6).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub crate::ContentHash);

impl IdempotencyKey {
    pub fn compute(question: &str, answer: &str, tenant_id: TenantId, model_version: &str) -> Self {
        let joined = format!("{question}|{answer}|{tenant_id}|{model_version}");
        Self(crate::compute_content_hash(joined.as_bytes()))
    }
}

impl std::fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdempotencyKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Tagged union emitted in causal order by the orchestrator. At most one
/// terminal event (`Done` or `Error`) is emitted per request, and no events
/// follow it (P7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum Event {
    /// Progress update, not terminal.
    Status {
        trace_id: TraceId,
        step: String,
        message: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        details: HashMap<String, serde_json::Value>,
    },
    /// A streamed token chunk from the selected LLM agent.
    Chunk { trace_id: TraceId, text: String },
    /// Successful terminal event.
    Done {
        trace_id: TraceId,
        query_id: QueryId,
        response: String,
        agent_used: String,
        intent_detected: Intent,
        cache_status: CacheStatus,
        cost_usd: f64,
        latency_ms: i64,
    },
    /// Failure terminal event. Only whitelisted fields are client-visible.
    Error {
        trace_id: TraceId,
        step: String,
        message: String,
        reason: Option<String>,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        details: HashMap<String, serde_json::Value>,
    },
}

/// Whether the terminal response came from a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CacheStatus {
    pub from_cache: bool,
}

// ============================================================================
// CO-RETRIEVAL
// ============================================================================

/// Undirected association between two retrieved items (§3, §4.8). Pairs are
/// normalized so `(a, b)` and `(b, a)` collapse to one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CoRetrievalEdge {
    pub item_a: String,
    pub item_b: String,
    pub count: u32,
    pub last_co_retrieval: crate::Timestamp,
    pub strength: f64,
    pub context_topics: HashMap<String, u32>,
}

impl CoRetrievalEdge {
    /// Normalize an unordered pair of ids into a canonical `(a, b)` with
    /// `a <= b`.
    pub fn normalize_pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str_round_trips_through_display() {
        for role in [Role::Public, Role::Viewer, Role::Member, Role::Lead, Role::Manager, Role::Admin] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("bogus".parse::<Role>().is_err());
    }

    #[test]
    fn test_request_validate_rejects_empty_query() {
        let req = Request {
            query: "   ".to_string(),
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
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_request_validate_rejects_out_of_range_limit() {
        let mut req = Request {
            query: "hello".to_string(),
            user_id: "u1".to_string(),
            tenant_id: TenantId::nil(),
            role: Role::Member,
            manual_agent: None,
            context_limit: 0,
            bypass_cache: false,
            conversation_id: None,
            thread_context: None,
            file_context: None,
        };
        assert!(req.validate().is_err());
        req.context_limit = 21;
        assert!(req.validate().is_err());
        req.context_limit = 20;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_threshold_set_ordering() {
        let good = ThresholdSet { cache: 0.95, raw: 0.85, knowledge: 0.6 };
        let bad = ThresholdSet { cache: 0.5, raw: 0.85, knowledge: 0.6 };
        assert!(good.is_ordered());
        assert!(!bad.is_ordered());
    }

    #[test]
    fn test_quality_score_tier_boundaries() {
        let raw = QualityScore { overall: 0.79, relevance: 0.5, completeness: 0.5, accuracy: 0.5, source_quality: 0.5 };
        let enriched = QualityScore { overall: 0.80, ..raw };
        let knowledge = QualityScore { overall: 0.85, ..raw };
        assert_eq!(raw.tier(), QualityTier::Raw);
        assert_eq!(enriched.tier(), QualityTier::Enriched);
        assert_eq!(knowledge.tier(), QualityTier::Knowledge);
    }

    #[test]
    fn test_idempotency_key_deterministic() {
        let tenant = TenantId::nil();
        let a = IdempotencyKey::compute("q", "a", tenant, "v1");
        let b = IdempotencyKey::compute("q", "a", tenant, "v1");
        let c = IdempotencyKey::compute("q", "a", tenant, "v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_coretrieval_pair_normalization() {
        assert_eq!(
            CoRetrievalEdge::normalize_pair("b", "a"),
            CoRetrievalEdge::normalize_pair("a", "b")
        );
    }

    #[test]
    fn test_detection_severity_mapping() {
        assert_eq!(DetectionType::Ssn.severity(), Severity::High);
        assert_eq!(DetectionType::Email.severity(), Severity::Medium);
        assert_eq!(DetectionType::IpAddress.severity(), Severity::Low);
    }
}
