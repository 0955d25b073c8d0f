//! Authentication Module
//!
//! Authentication and authorization for the query orchestration API. Supports
//! two authentication methods:
//! 1. API Key authentication (via X-API-Key header)
//! 2. JWT token authentication (via Authorization: Bearer header)
//!
//! Also extracts tenant context from the X-Tenant-ID header for multi-tenant
//! isolation, and maps the authenticated caller onto `qorc_core::Role` for
//! `PrivacyPolicy` enforcement downstream.

use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use qorc_core::{ConfigError, OrchestratorError, Role, TenantId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// CLOCK ABSTRACTION (FOR DETERMINISTIC TESTS + CI ROBUSTNESS)
// ============================================================================

/// Clock abstraction for JWT time validation.
///
/// Allows injecting time in tests and handles broken CI environments where
/// `SystemTime::now()` might return pre-epoch times (causing panics). By
/// owning time validation ourselves (instead of letting `jsonwebtoken` do
/// it), we avoid the `SystemTime::now().duration_since(UNIX_EPOCH).expect()`
/// panic path and make tests fully deterministic.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds. Negative for pre-1970 clocks.
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
pub mod test_clocks {
    use super::FixedClock;

    /// 2024-01-01 00:00:00 UTC - always valid for tests
    pub fn valid() -> FixedClock {
        FixedClock(1704067200)
    }

    /// 2030-01-01 00:00:00 UTC - far future for expiry tests
    pub fn future() -> FixedClock {
        FixedClock(1893456000)
    }
}

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// Type-safe JWT secret that prevents accidental logging.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    pub fn new(secret: String) -> Result<Self, OrchestratorError> {
        if secret.is_empty() {
            return Err(OrchestratorError::Config(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            }));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION"
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Valid API keys (in production, load from secure storage)
    pub api_keys: HashSet<String>,

    pub jwt_secret: JwtSecret,
    pub jwt_algorithm: Algorithm,

    /// JWT token expiration in seconds (default: 1 hour)
    pub jwt_expiration_secs: i64,

    /// Clock skew tolerance in seconds (default: 60). Standard practice
    /// (AWS, Google, Auth0 all do this) to handle drift across distributed
    /// clocks.
    pub jwt_clock_skew_secs: i64,

    /// Whether X-Tenant-ID is required when the JWT carries no tenant claim.
    pub require_tenant_header: bool,

    /// Clock for JWT time validation (injected for testing).
    #[allow(clippy::type_complexity)]
    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_keys", &format!("[{} keys]", self.api_keys.len()))
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("require_tenant_header", &self.require_tenant_header)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let secret_str = std::env::var("QORC_JWT_SECRET")
            .unwrap_or_else(|_| "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION".to_string());

        Self {
            api_keys: HashSet::new(),
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: 3600,
            jwt_clock_skew_secs: 60,
            require_tenant_header: true,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Load from environment variables:
    /// - `QORC_API_KEYS`: comma-separated list of valid API keys
    /// - `QORC_JWT_SECRET`: JWT signing secret
    /// - `QORC_JWT_EXPIRATION_SECS`: token expiration (default 3600)
    /// - `QORC_JWT_CLOCK_SKEW_SECS`: clock skew tolerance (default 60)
    /// - `QORC_REQUIRE_TENANT_HEADER`: whether X-Tenant-ID is required (default true)
    pub fn from_env() -> Self {
        let mut api_keys = HashSet::new();
        if let Ok(keys_str) = std::env::var("QORC_API_KEYS") {
            for key in keys_str.split(',') {
                let trimmed = key.trim();
                if !trimmed.is_empty() {
                    api_keys.insert(trimmed.to_string());
                }
            }
        }

        let secret_str = std::env::var("QORC_JWT_SECRET")
            .unwrap_or_else(|_| "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION".to_string());

        Self {
            api_keys,
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: std::env::var("QORC_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            jwt_clock_skew_secs: std::env::var("QORC_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            require_tenant_header: std::env::var("QORC_REQUIRE_TENANT_HEADER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            clock: Arc::new(SystemClock),
        }
    }

    /// Validate the authentication configuration for production use. Call at
    /// server startup; in development, insecure defaults only warn.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("QORC_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "Cannot start server in production with insecure JWT secret. \
                     Set QORC_JWT_SECRET to a secure value. QORC_ENVIRONMENT={}",
                    environment
                )));
            } else {
                tracing::warn!(
                    "SECURITY WARNING: using insecure default JWT secret. Acceptable for \
                     local development but must be changed before deploying. Set \
                     QORC_JWT_SECRET to a secure random value (minimum 32 characters)."
                );
            }
        }

        if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars); must be at least \
                     32 characters long.",
                    self.jwt_secret.len()
                )));
            } else if !self.jwt_secret.is_insecure_default() {
                tracing::warn!(
                    "SECURITY WARNING: JWT secret is short ({} chars); use at least 32 \
                     characters for production.",
                    self.jwt_secret.len()
                );
            }
        }

        Ok(())
    }

    pub fn add_api_key(&mut self, key: String) {
        self.api_keys.insert(key);
    }

    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION".to_string()
    } else {
        secret_str
    };

    match JwtSecret::new(normalized) {
        Ok(secret) => secret,
        Err(_) => JwtSecret(SecretString::new(
            "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION".to_string().into(),
        )),
    }
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub tenant_id: Option<String>,

    /// Raw role strings; mapped to `qorc_core::Role` via `AuthContext::role()`.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn new(
        user_id: String,
        tenant_id: Option<TenantId>,
        expiration_secs: i64,
        clock: &dyn JwtClock,
    ) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: user_id,
            iat: now,
            exp: now + expiration_secs,
            tenant_id: tenant_id.map(|id| id.to_string()),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: String) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn is_expired(&self, clock: &dyn JwtClock) -> bool {
        self.exp < clock.now_epoch_secs()
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id.as_ref().and_then(|s| Uuid::parse_str(s).ok()).map(TenantId::new)
    }
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// Authentication context extracted from a request, injected into Axum
/// request extensions after successful authentication.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// User ID (from JWT sub claim or API key identifier)
    pub user_id: String,
    pub tenant_id: TenantId,

    /// Raw role strings as presented by the credential (JWT claim or fixed
    /// API-key role). The highest-privilege parseable role is used for
    /// `PrivacyPolicy`; see [`AuthContext::role`].
    pub roles: Vec<String>,
    pub auth_method: AuthMethod,
}

impl AuthContext {
    pub fn new(
        user_id: String,
        tenant_id: TenantId,
        roles: Vec<String>,
        auth_method: AuthMethod,
    ) -> Self {
        Self { user_id, tenant_id, roles, auth_method }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Resolve the caller's `qorc_core::Role` for privacy filtering. Unknown
    /// or absent role strings fall back to `Role::Public`, the least
    /// privileged tier -- never fail open.
    pub fn role(&self) -> Role {
        self.roles
            .iter()
            .filter_map(|r| r.parse::<Role>().ok())
            .max_by_key(|role| match role {
                Role::Public => 0,
                Role::Viewer => 1,
                Role::Member => 2,
                Role::Lead => 3,
                Role::Manager => 4,
                Role::Admin => 5,
            })
            .unwrap_or(Role::Public)
    }
}

/// Authentication method used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Jwt,
}

// ============================================================================
// AUTHENTICATION FUNCTIONS
// ============================================================================

pub fn validate_api_key(config: &AuthConfig, api_key: &str) -> ApiResult<()> {
    if config.is_valid_api_key(api_key) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Invalid API key"))
    }
}

/// Validate JWT claim times using our own clock logic, separated from
/// signature validation so we can handle broken CI environments (pre-epoch
/// clocks) gracefully, keep tests deterministic with injected clocks, and
/// apply our own clock-skew policy.
fn validate_claim_times(now: i64, exp: i64, nbf: Option<i64>, leeway_secs: i64) -> ApiResult<()> {
    if let Some(nbf) = nbf {
        if now + leeway_secs < nbf {
            return Err(ApiError::unauthorized("Token not yet valid (nbf)"));
        }
    }
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Validate a JWT token and extract claims. Performs signature validation
/// only (no time validation) to avoid the
/// `SystemTime::now().duration_since(UNIX_EPOCH).expect()` panic path in
/// `jsonwebtoken`; time validation happens separately with injected clocks.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidToken => {
                ApiError::invalid_token("Token is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();

    if now < 0 {
        tracing::error!(timestamp = now, "system clock returned pre-epoch time");
        return Err(ApiError::internal_error(
            "Server time configuration error - please contact support",
        ));
    }

    validate_claim_times(now, claims.exp, None, config.jwt_clock_skew_secs)?;
    Ok(claims)
}

pub fn generate_jwt_token(
    config: &AuthConfig,
    user_id: String,
    tenant_id: Option<TenantId>,
    roles: Vec<String>,
) -> ApiResult<String> {
    let claims =
        Claims::new(user_id, tenant_id, config.jwt_expiration_secs, &*config.clock).with_roles(roles);

    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let header = Header::new(config.jwt_algorithm);

    encode(&header, &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Parse the X-Tenant-ID header as a UUID.
pub fn extract_tenant_id(header_value: &str) -> ApiResult<TenantId> {
    let uuid =
        Uuid::parse_str(header_value).map_err(|_| ApiError::invalid_format("X-Tenant-ID", "valid UUID"))?;
    Ok(TenantId::new(uuid))
}

/// Authenticate via the X-API-Key header. Also extracts tenant ID from
/// X-Tenant-ID.
pub fn authenticate_api_key(
    config: &AuthConfig,
    api_key: &str,
    tenant_id_header: Option<&str>,
) -> ApiResult<AuthContext> {
    validate_api_key(config, api_key)?;

    let tenant_id = if let Some(tenant_header) = tenant_id_header {
        extract_tenant_id(tenant_header)?
    } else if config.require_tenant_header {
        return Err(ApiError::missing_field("X-Tenant-ID"));
    } else {
        TenantId::new(Uuid::nil())
    };

    // API-key callers identify by a prefix of the key itself; in production
    // this would resolve to a user record via secure storage.
    let user_id = format!("api_key_{}", &api_key[..8.min(api_key.len())]);

    Ok(AuthContext::new(user_id, tenant_id, vec!["member".to_string()], AuthMethod::ApiKey))
}

/// Authenticate via the Authorization: Bearer header. Tenant ID comes from
/// either the JWT claims or the X-Tenant-ID header (header wins).
pub fn authenticate_jwt(
    config: &AuthConfig,
    token: &str,
    tenant_id_header: Option<&str>,
) -> ApiResult<AuthContext> {
    let claims = validate_jwt_token(config, token)?;

    let tenant_id = if let Some(tenant_header) = tenant_id_header {
        extract_tenant_id(tenant_header)?
    } else if let Some(jwt_tenant_id) = claims.tenant_id() {
        jwt_tenant_id
    } else if config.require_tenant_header {
        return Err(ApiError::missing_field("X-Tenant-ID or JWT tenant_id claim"));
    } else {
        TenantId::new(Uuid::nil())
    };

    Ok(AuthContext::new(claims.sub, tenant_id, claims.roles, AuthMethod::Jwt))
}

/// Authenticate a request using either API key or JWT token, trying API key
/// first.
pub fn authenticate(
    config: &AuthConfig,
    api_key_header: Option<&str>,
    auth_header: Option<&str>,
    tenant_id_header: Option<&str>,
) -> ApiResult<AuthContext> {
    if let Some(api_key) = api_key_header {
        return authenticate_api_key(config, api_key, tenant_id_header);
    }

    if let Some(auth_value) = auth_header {
        if let Some(token) = auth_value.strip_prefix("Bearer ") {
            return authenticate_jwt(config, token, tenant_id_header);
        } else {
            return Err(ApiError::invalid_token("Authorization header must use Bearer scheme"));
        }
    }

    Err(ApiError::unauthorized("Authentication required: provide X-API-Key or Authorization header"))
}

/// Validate that the authenticated caller's tenant matches the requested one.
pub fn check_tenant_access(auth_context: &AuthContext, requested_tenant_id: TenantId) -> ApiResult<()> {
    if auth_context.tenant_id == requested_tenant_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("Access denied to tenant {}", requested_tenant_id)))
    }
}

// ============================================================================
// TESTS
// ============================================================================
