//! Middleware modules for the query orchestration API.
//!
//! - `auth`: Authentication and tenant/rate-limit middleware.
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/ask", post(handler))
//!     // Innermost (runs last on request, first on response)
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
//!     // Rate limiting runs first (before auth)
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     // Outermost
//! ```

mod auth;

pub use auth::{
    auth_middleware, extract_auth_context, extract_auth_context_owned, rate_limit_middleware,
    tenant_access_middleware, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState,
    RateLimitError, RateLimitKey, RateLimitState,
};
