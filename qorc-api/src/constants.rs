//! Constants for the query orchestration API.
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Default JWT token expiration time in seconds (1 hour)
pub const DEFAULT_JWT_EXPIRATION_SECS: i64 = 3600;

/// Minimum required length for JWT secret keys
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// RATE LIMITING (transport-level, IP-scoped; see `config::ApiConfig`)
// ============================================================================

pub const DEFAULT_RATE_LIMIT_UNAUTHENTICATED: u32 = 100;
pub const DEFAULT_RATE_LIMIT_AUTHENTICATED: u32 = 1000;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 10;

// ============================================================================
// REQUEST BOUNDS
// ============================================================================

/// `Request.context_limit` lower bound.
pub const MIN_CONTEXT_LIMIT: u32 = 1;

/// `Request.context_limit` upper bound.
pub const MAX_CONTEXT_LIMIT: u32 = 20;

// ============================================================================
// SERVER URLs
// ============================================================================

pub const DEV_SERVER_URL: &str = "http://localhost:3000";
pub const PROD_SERVER_URL: &str = "https://api.qorc.run";
