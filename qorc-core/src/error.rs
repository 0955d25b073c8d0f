//! Error taxonomy for the query orchestration core.
//!
//! Mirrors §7 of the design: security-relevant outcomes are values in the
//! event stream, not exceptions that cross the orchestrator boundary. Each
//! enum below corresponds to one failure mode there; `OrchestratorError` is
//! the master type and `QorcResult<T>` the crate-wide alias.

use crate::DetectionType;
use thiserror::Error;

/// PreflightGate failures. Always terminal for the current request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("query blocked: {reason} (detection={detection:?})")]
    Blocked {
        detection: DetectionType,
        reason: String,
    },
}

/// RateLimiter denial. Terminal; carries retry-after guidance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "rate limit exceeded for user {user_id}: retry after {retry_after_secs}s (window={window_seconds}s)"
)]
pub struct RateLimitedError {
    pub user_id: String,
    pub retry_after_secs: i64,
    pub window_seconds: i64,
}

/// CircuitBreaker rejection. Internal; triggers agent fallback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit open for service {service}, retry after {retry_after_secs}s")]
pub struct CircuitOpenError {
    pub service: String,
    pub retry_after_secs: i64,
}

/// Every candidate LLM agent's breaker was open, or every agent call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("all LLM agents unavailable for intent {intent}")]
pub struct AllAgentsUnavailableError {
    pub intent: String,
}

/// A single retrieval source failed; recovered, contributes zero results.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("retrieval source '{source}' failed: {reason}")]
pub struct PartialRetrievalFailure {
    pub source: String,
    pub reason: String,
}

/// A tiered memory write failed; recovered, never surfaced to the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("persistence failure writing tier {tier}: {reason}")]
pub struct PersistenceFailure {
    pub tier: String,
    pub reason: String,
}

/// Configuration errors, following the `field/value/reason` shape used
/// throughout the codebase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for the orchestration core.
///
/// Only `Internal` is allowed to cross the orchestrator boundary unmapped;
/// every other variant has a deterministic, whitelisted client-facing
/// projection (see `orchestrator::Event::Error`).
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("preflight: {0}")]
    Preflight(#[from] PreflightError),

    #[error("rate limit: {0}")]
    RateLimited(#[from] RateLimitedError),

    #[error("circuit open: {0}")]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("agents unavailable: {0}")]
    AllAgentsUnavailable(#[from] AllAgentsUnavailableError),

    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceFailure),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Any uncaught failure. Internal details (stack traces, endpoint URLs,
    /// API keys) must never be placed in the message that reaches a client;
    /// keep those in the `tracing` span only.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the core.
pub type QorcResult<T> = Result<T, OrchestratorError>;
