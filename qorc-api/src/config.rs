//! API Configuration Module
//!
//! Configuration for CORS and transport-level rate limiting (IP-scoped, in
//! front of the orchestrator's own per-user `RateLimiter`). Loaded from
//! environment variables with sensible defaults for development.

use std::time::Duration;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS and transport-level hardening.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://qorc.run,https://app.qorc.run"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Transport-level rate limiting (governor, IP-scoped)
    //
    // This sits in front of `qorc_core::rate_limiter::RateLimiter`, which
    // enforces the domain-level per-user budget once a request is
    // authenticated. This layer exists to blunt unauthenticated abuse before
    // a request ever reaches the orchestrator.
    // ========================================================================
    pub rate_limit_enabled: bool,

    /// Requests per minute per IP, unauthenticated.
    pub rate_limit_unauthenticated: u32,

    /// Requests per minute per IP, authenticated.
    pub rate_limit_authenticated: u32,

    /// Burst capacity beyond the steady-state limit.
    pub rate_limit_burst: u32,

    pub rate_limit_window: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            rate_limit_enabled: true,
            rate_limit_unauthenticated: 100,
            rate_limit_authenticated: 1000,
            rate_limit_burst: 10,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl ApiConfig {
    /// Load from environment variables:
    /// - `QORC_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `QORC_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `QORC_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    /// - `QORC_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `QORC_RATE_LIMIT_UNAUTHENTICATED`: requests/min per IP (default: 100)
    /// - `QORC_RATE_LIMIT_AUTHENTICATED`: requests/min per IP (default: 1000)
    /// - `QORC_RATE_LIMIT_BURST`: burst capacity (default: 10)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("QORC_CORS_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("QORC_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs =
            std::env::var("QORC_CORS_MAX_AGE_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(86400);

        let rate_limit_enabled = std::env::var("QORC_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_unauthenticated = std::env::var("QORC_RATE_LIMIT_UNAUTHENTICATED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let rate_limit_authenticated = std::env::var("QORC_RATE_LIMIT_AUTHENTICATED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let rate_limit_burst =
            std::env::var("QORC_RATE_LIMIT_BURST").ok().and_then(|s| s.parse().ok()).unwrap_or(10);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            rate_limit_enabled,
            rate_limit_unauthenticated,
            rate_limit_authenticated,
            rate_limit_burst,
            rate_limit_window: Duration::from_secs(60),
        }
    }

    /// Running in production mode implies strict CORS.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(pattern)
                        || origin_domain == pattern.strip_prefix('.').unwrap_or(pattern);
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_unauthenticated, 100);
        assert_eq!(config.rate_limit_authenticated, 1000);
        assert_eq!(config.rate_limit_burst, 10);
    }

    #[test]
    fn test_is_production() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());

        config.cors_origins = vec!["https://qorc.run".to_string()];
        assert!(config.is_production());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.com"));
        assert!(config.is_origin_allowed("http://localhost:3000"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let mut config = ApiConfig::default();
        config.cors_origins = vec!["https://qorc.run".to_string(), "https://app.qorc.run".to_string()];

        assert!(config.is_origin_allowed("https://qorc.run"));
        assert!(config.is_origin_allowed("https://app.qorc.run"));
        assert!(!config.is_origin_allowed("https://evil.com"));
        assert!(!config.is_origin_allowed("https://notqorc.run"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let mut config = ApiConfig::default();
        config.cors_origins = vec!["*.qorc.run".to_string()];

        assert!(config.is_origin_allowed("https://app.qorc.run"));
        assert!(config.is_origin_allowed("https://api.qorc.run"));
        assert!(!config.is_origin_allowed("https://evil.com"));
    }
}
