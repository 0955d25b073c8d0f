//! Axum Middleware for Authentication and Authorization
//!
//! This module provides Axum middleware that:
//! - Authenticates requests using API keys or JWT tokens
//! - Extracts tenant context from headers
//! - Injects AuthContext into request extensions
//! - Returns 401 for unauthenticated requests
//! - Returns 403 for unauthorized tenant access

use crate::auth::{authenticate, AuthConfig, AuthContext};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self { auth_config: Arc::new(auth_config) }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Axum middleware for authentication and authorization.
///
/// 1. Extracts authentication headers (X-API-Key or Authorization: Bearer)
/// 2. Extracts tenant context header (X-Tenant-ID)
/// 3. Validates authentication using the auth module
/// 4. Returns 401 if authentication fails
/// 5. Injects AuthContext into request extensions on success
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let api_key_header = request.headers().get("x-api-key").and_then(|h| h.to_str().ok());
    let auth_header = request.headers().get("authorization").and_then(|h| h.to_str().ok());
    let tenant_id_header = request.headers().get("x-tenant-id").and_then(|h| h.to_str().ok());

    let auth_context = authenticate(&state.auth_config, api_key_header, auth_header, tenant_id_header)
        .map_err(AuthMiddlewareError)?;

    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        let api_error = self.0;
        let status = api_error.status_code();
        (status, axum::Json(api_error)).into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for authentication context. Requires `auth_middleware`
/// to be applied to the route; otherwise returns 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthContext>().cloned().map(AuthExtractor).ok_or_else(|| {
            AuthMiddlewareError(ApiError::internal_error(
                "AuthContext not found in request extensions. Ensure auth_middleware is applied to this route.",
            ))
        })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Extract AuthContext from request extensions, injected by `auth_middleware`.
pub fn extract_auth_context(request: &Request) -> ApiResult<&AuthContext> {
    request.extensions().get::<AuthContext>().ok_or_else(|| ApiError::unauthorized("Auth context missing from request"))
}

pub fn extract_auth_context_owned(request: &Request) -> ApiResult<AuthContext> {
    extract_auth_context(request).cloned()
}

// ============================================================================
// TENANT-SPECIFIC MIDDLEWARE
// ============================================================================

/// Validates that the authenticated caller carries tenant context. Routes
/// that operate on a specific tenant's data still compare against
/// path/query parameters in the handler itself via `check_tenant_access`.
pub async fn tenant_access_middleware(request: Request, next: Next) -> Result<Response, AuthMiddlewareError> {
    let auth_context = extract_auth_context(&request).map_err(AuthMiddlewareError)?;

    if auth_context.tenant_id.to_string().is_empty() {
        return Err(AuthMiddlewareError(ApiError::forbidden("Tenant context required")));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// RATE LIMITING MIDDLEWARE (transport-level, IP/tenant-scoped)
// ============================================================================

use crate::config::ApiConfig;
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Key for rate limiting - either IP address or tenant ID.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    Ip(IpAddr),
    Tenant(String),
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    limiters: Arc<DashMap<RateLimitKey, Arc<DirectRateLimiter>>>,
}

impl RateLimitState {
    pub fn new(config: ApiConfig) -> Self {
        Self { config: Arc::new(config), limiters: Arc::new(DashMap::new()) }
    }

    /// Get or create a rate limiter for the given key. DashMap's entry API
    /// handles the get-or-insert atomically, so no lock poisoning.
    fn get_or_create_limiter(&self, key: &RateLimitKey) -> Result<Arc<DirectRateLimiter>, RateLimitError> {
        let limiter = self.limiters.entry(key.clone()).or_insert_with(|| {
            let requests_per_minute = match key {
                RateLimitKey::Ip(_) => self.config.rate_limit_unauthenticated,
                RateLimitKey::Tenant(_) => self.config.rate_limit_authenticated,
            };

            let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN))
                .allow_burst(NonZeroU32::new(self.config.rate_limit_burst).unwrap_or(NonZeroU32::MIN));

            Arc::new(RateLimiter::direct(quota))
        });

        Ok(limiter.clone())
    }
}

/// Error type for rate limit middleware.
pub struct RateLimitError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        use axum::http::HeaderValue;

        let error = crate::error::ApiError::too_many_requests(Some(self.retry_after as i64));
        let status = StatusCode::TOO_MANY_REQUESTS;

        let mut response = (status, axum::Json(error)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            axum::http::header::HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string()).unwrap_or_else(|_| HeaderValue::from_static("60")),
        );

        response
    }
}

/// Extract client IP from request, considering proxy headers.
fn extract_client_ip(request: &Request, fallback: std::net::SocketAddr) -> IpAddr {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }

    fallback.ip()
}

/// Rate limiting middleware: IP address for unauthenticated requests, tenant
/// ID for authenticated ones. Returns 429 with Retry-After on limit.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    use axum::http::HeaderValue;

    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let key = if let Some(auth) = request.extensions().get::<AuthContext>() {
        RateLimitKey::Tenant(auth.tenant_id.to_string())
    } else {
        RateLimitKey::Ip(extract_client_ip(&request, addr))
    };

    let limiter = state.get_or_create_limiter(&key)?;

    match limiter.check() {
        Ok(_) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();

            let limit = match &key {
                RateLimitKey::Ip(_) => state.config.rate_limit_unauthenticated,
                RateLimitKey::Tenant(_) => state.config.rate_limit_authenticated,
            };
            headers.insert(
                axum::http::header::HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from_str(&limit.to_string()).unwrap_or_else(|_| HeaderValue::from_static("100")),
            );

            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);

            Err(RateLimitError { retry_after })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::auth::JwtSecret;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use qorc_core::{EntityIdType, TenantId};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_auth_config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.add_api_key("test_key_123".to_string());
        config.jwt_secret = JwtSecret::new("test_secret".to_string()).expect("test secret should be valid");
        config.require_tenant_header = true;
        config
    }

    fn test_app() -> Router {
        let auth_config = test_auth_config();
        let auth_state = AuthMiddlewareState::new(auth_config);

        Router::new()
            .route("/protected", get(|| async { "Protected resource" }))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
    }

    #[tokio::test]
    async fn test_middleware_with_valid_api_key() -> Result<(), String> {
        let app = test_app();
        let tenant_id = TenantId::new(Uuid::now_v7());

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "test_key_123")
            .header("x-tenant-id", tenant_id.to_string())
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_with_invalid_api_key() -> Result<(), String> {
        let app = test_app();
        let tenant_id = TenantId::new(Uuid::now_v7());

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "invalid_key")
            .header("x-tenant-id", tenant_id.to_string())
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_without_authentication() -> Result<(), String> {
        let app = test_app();

        let request = Request::builder().uri("/protected").body(Body::empty()).map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_without_tenant_header() -> Result<(), String> {
        let app = test_app();

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "test_key_123")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_with_valid_jwt() -> Result<(), String> {
        let auth_config = test_auth_config();
        let user_id = "user123".to_string();
        let tenant_id = TenantId::new(Uuid::now_v7());

        let token = crate::auth::generate_jwt_token(&auth_config, user_id, Some(tenant_id), vec!["admin".to_string()])
            .map_err(|e| e.message)?;

        let auth_state = AuthMiddlewareState::new(auth_config);
        let app = Router::new()
            .route("/protected", get(|| async { "Protected resource" }))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let request = Request::builder()
            .uri("/protected")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_with_invalid_jwt() -> Result<(), String> {
        let app = test_app();

        let request = Request::builder()
            .uri("/protected")
            .header("authorization", "Bearer invalid.jwt.token")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_middleware_with_malformed_auth_header() -> Result<(), String> {
        let app = test_app();

        let request = Request::builder()
            .uri("/protected")
            .header("authorization", "NotBearer token")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_context_injection() -> Result<(), String> {
        let auth_config = test_auth_config();
        let auth_state = AuthMiddlewareState::new(auth_config);
        let tenant_id = TenantId::new(Uuid::now_v7());

        async fn handler(request: Request<Body>) -> ApiResult<String> {
            let auth_context = extract_auth_context(&request)?;
            Ok(format!("User: {}, Tenant: {}, Method: {:?}", auth_context.user_id, auth_context.tenant_id, auth_context.auth_method))
        }

        let app = Router::new()
            .route("/protected", get(handler))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "test_key_123")
            .header("x-tenant-id", tenant_id.to_string())
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.map_err(|e| format!("Failed to read body: {:?}", e))?;
        let body_str = String::from_utf8(body.to_vec()).map_err(|e| format!("Invalid UTF-8 body: {}", e))?;

        assert!(body_str.contains("User: api_key_"));
        assert!(body_str.contains(&format!("Tenant: {}", tenant_id)));
        assert!(body_str.contains("Method: ApiKey"));
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_extractor_with_valid_auth() -> Result<(), String> {
        let auth_config = test_auth_config();
        let auth_state = AuthMiddlewareState::new(auth_config);
        let tenant_id = TenantId::new(Uuid::now_v7());

        async fn handler(AuthExtractor(auth): AuthExtractor) -> String {
            format!("User: {}, Tenant: {}, Method: {:?}", auth.user_id, auth.tenant_id, auth.auth_method)
        }

        let app = Router::new()
            .route("/protected", get(handler))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "test_key_123")
            .header("x-tenant-id", tenant_id.to_string())
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.map_err(|e| format!("Failed to read body: {:?}", e))?;
        let body_str = String::from_utf8(body.to_vec()).map_err(|e| format!("Invalid UTF-8 body: {}", e))?;

        assert!(body_str.contains("User: api_key_"));
        assert!(body_str.contains(&format!("Tenant: {}", tenant_id)));
        assert!(body_str.contains("Method: ApiKey"));
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_extractor_without_middleware() -> Result<(), String> {
        async fn handler(AuthExtractor(_auth): AuthExtractor) -> String {
            "Should not reach here".to_string()
        }

        let app = Router::new().route("/unprotected", get(handler));

        let request = Request::builder().uri("/unprotected").body(Body::empty()).map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_extractor_deref() -> Result<(), String> {
        let auth_config = test_auth_config();
        let auth_state = AuthMiddlewareState::new(auth_config);
        let tenant_id = TenantId::new(Uuid::now_v7());

        async fn handler(auth: AuthExtractor) -> String {
            if auth.has_role("member") {
                format!("User {} has member role", auth.user_id)
            } else {
                "No role".to_string()
            }
        }

        let app = Router::new()
            .route("/protected", get(handler))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let request = Request::builder()
            .uri("/protected")
            .header("x-api-key", "test_key_123")
            .header("x-tenant-id", tenant_id.to_string())
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = app.oneshot(request).await.map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.map_err(|e| format!("Failed to read body: {:?}", e))?;
        let body_str = String::from_utf8(body.to_vec()).map_err(|e| format!("Invalid UTF-8 body: {}", e))?;

        assert!(body_str.contains("has member role"));
        Ok(())
    }
}
