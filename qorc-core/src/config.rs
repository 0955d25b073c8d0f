//! Master configuration for the orchestration core (§6 configuration table,
//! §10.3). Every field is required — no silent per-field defaults baked
//! into the type itself; `OrchestratorConfig::from_env()` is the one place
//! that applies the documented defaults.

use crate::{ConfigError, OrchestratorError, QorcResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OrchestratorConfig {
    // RateLimiter
    pub blocked_rate_limit: u32,
    pub global_rate_limit: u32,
    pub rate_limit_window_seconds: i64,

    // CircuitBreaker
    pub cb_failure_threshold: u32,
    pub cb_recovery_timeout_s: u64,
    pub cb_success_threshold: u32,

    // QueryPlanner / RetrievalEngine feature flags
    pub enable_web_search: bool,
    pub enable_knowledge_preflight: bool,
    pub enable_adaptive_thresholds: bool,
    pub enable_coretrieval_tracking: bool,

    // RetrievalEngine
    pub passthrough_threshold: f32,
    pub max_context_chars: usize,

    // MemoryWriter
    pub raw_ttl_seconds: i64,
    pub enriched_ttl_seconds: i64,
    /// `None` means no expiry (knowledge tier default).
    pub knowledge_ttl_seconds: Option<i64>,
}

impl OrchestratorConfig {
    /// Validate every field. Returns a structured
    /// `ConfigError::InvalidValue{field, value, reason}` on the first
    /// violation found.
    pub fn validate(&self) -> QorcResult<()> {
        let check = |cond: bool, field: &str, value: String, reason: &str| -> QorcResult<()> {
            if cond {
                Ok(())
            } else {
                Err(OrchestratorError::Config(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value,
                    reason: reason.to_string(),
                }))
            }
        };

        check(self.blocked_rate_limit > 0, "blocked_rate_limit", self.blocked_rate_limit.to_string(), "must be positive")?;
        check(self.global_rate_limit > 0, "global_rate_limit", self.global_rate_limit.to_string(), "must be positive")?;
        check(
            self.global_rate_limit >= self.blocked_rate_limit,
            "global_rate_limit",
            self.global_rate_limit.to_string(),
            "must be >= blocked_rate_limit",
        )?;
        check(
            self.rate_limit_window_seconds > 0,
            "rate_limit_window_seconds",
            self.rate_limit_window_seconds.to_string(),
            "must be positive",
        )?;
        check(self.cb_failure_threshold > 0, "cb_failure_threshold", self.cb_failure_threshold.to_string(), "must be positive")?;
        check(self.cb_recovery_timeout_s > 0, "cb_recovery_timeout_s", self.cb_recovery_timeout_s.to_string(), "must be positive")?;
        check(self.cb_success_threshold > 0, "cb_success_threshold", self.cb_success_threshold.to_string(), "must be positive")?;
        check(
            (0.0..=1.0).contains(&self.passthrough_threshold),
            "passthrough_threshold",
            self.passthrough_threshold.to_string(),
            "must be in [0, 1]",
        )?;
        check(self.max_context_chars > 0, "max_context_chars", self.max_context_chars.to_string(), "must be positive")?;
        check(self.raw_ttl_seconds > 0, "raw_ttl_seconds", self.raw_ttl_seconds.to_string(), "must be positive")?;
        check(
            self.enriched_ttl_seconds >= self.raw_ttl_seconds,
            "enriched_ttl_seconds",
            self.enriched_ttl_seconds.to_string(),
            "must be >= raw_ttl_seconds",
        )?;
        if let Some(knowledge) = self.knowledge_ttl_seconds {
            check(knowledge > 0, "knowledge_ttl_seconds", knowledge.to_string(), "must be positive when set")?;
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    /// Defaults from §6's configuration table.
    fn default() -> Self {
        Self {
            blocked_rate_limit: 5,
            global_rate_limit: 100,
            rate_limit_window_seconds: 60,
            cb_failure_threshold: 5,
            cb_recovery_timeout_s: 30,
            cb_success_threshold: 2,
            enable_web_search: true,
            enable_knowledge_preflight: true,
            enable_adaptive_thresholds: true,
            enable_coretrieval_tracking: true,
            passthrough_threshold: 0.55,
            max_context_chars: 4000,
            raw_ttl_seconds: 604_800,
            enriched_ttl_seconds: 2_592_000,
            knowledge_ttl_seconds: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from `QORC_*` environment variables, falling back to
    /// [`OrchestratorConfig::default`] per field, then validate.
    pub fn from_env() -> QorcResult<Self> {
        let defaults = Self::default();
        let env_parse = |key: &str, fallback: u32| -> u32 {
            std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };
        let env_parse_i64 = |key: &str, fallback: i64| -> i64 {
            std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };
        let env_parse_bool = |key: &str, fallback: bool| -> bool {
            std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };
        let env_parse_f32 = |key: &str, fallback: f32| -> f32 {
            std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };

        let config = Self {
            blocked_rate_limit: env_parse("QORC_BLOCKED_RATE_LIMIT", defaults.blocked_rate_limit),
            global_rate_limit: env_parse("QORC_GLOBAL_RATE_LIMIT", defaults.global_rate_limit),
            rate_limit_window_seconds: env_parse_i64(
                "QORC_RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            ),
            cb_failure_threshold: env_parse("QORC_CB_FAILURE_THRESHOLD", defaults.cb_failure_threshold),
            cb_recovery_timeout_s: env_parse("QORC_CB_RECOVERY_TIMEOUT_S", defaults.cb_recovery_timeout_s as u32) as u64,
            cb_success_threshold: env_parse("QORC_CB_SUCCESS_THRESHOLD", defaults.cb_success_threshold),
            enable_web_search: env_parse_bool("QORC_ENABLE_WEB_SEARCH", defaults.enable_web_search),
            enable_knowledge_preflight: env_parse_bool(
                "QORC_ENABLE_KNOWLEDGE_PREFLIGHT",
                defaults.enable_knowledge_preflight,
            ),
            enable_adaptive_thresholds: env_parse_bool(
                "QORC_ENABLE_ADAPTIVE_THRESHOLDS",
                defaults.enable_adaptive_thresholds,
            ),
            enable_coretrieval_tracking: env_parse_bool(
                "QORC_ENABLE_CORETRIEVAL_TRACKING",
                defaults.enable_coretrieval_tracking,
            ),
            passthrough_threshold: env_parse_f32("QORC_PASSTHROUGH_THRESHOLD", defaults.passthrough_threshold),
            max_context_chars: env_parse("QORC_MAX_CONTEXT_CHARS", defaults.max_context_chars as u32) as usize,
            raw_ttl_seconds: env_parse_i64("QORC_RAW_TTL_SECONDS", defaults.raw_ttl_seconds),
            enriched_ttl_seconds: env_parse_i64("QORC_ENRICHED_TTL_SECONDS", defaults.enriched_ttl_seconds),
            knowledge_ttl_seconds: std::env::var("QORC_KNOWLEDGE_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok()),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_blocked_limit_above_global() {
        let config = OrchestratorConfig {
            blocked_rate_limit: 200,
            global_rate_limit: 100,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_passthrough_threshold() {
        let config = OrchestratorConfig { passthrough_threshold: 1.5, ..OrchestratorConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_enriched_ttl_below_raw_ttl() {
        let config = OrchestratorConfig {
            raw_ttl_seconds: 1000,
            enriched_ttl_seconds: 500,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
