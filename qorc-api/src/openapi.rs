//! OpenAPI Specification for the Query Orchestration API
//!
//! Defines the OpenAPI document using utoipa, generated from route
//! annotations and the schema types that cross the HTTP boundary.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{ask, feedback, health};

use qorc_core::{Event, HealthStatus, Intent, Role};

/// OpenAPI document for the query orchestration API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Query Orchestration API",
        version = "0.1.0",
        description = "Adaptive-context LLM gateway: preflight security classification, \
                        RBAC-scoped retrieval, circuit-breaker-protected LLM streaming, \
                        and tiered memory writes.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Query Orchestration Core", url = "https://qorc.run")
    ),
    servers(
        (url = "https://api.qorc.run", description = "Production"),
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Query", description = "Orchestrated query execution and feedback"),
        (name = "Observability", description = "Health, readiness, and metrics"),
    ),
    paths(
        ask::ask,
        feedback::update_feedback,
        health::healthz,
        health::readyz,
    ),
    components(
        schemas(
            ApiError, ErrorCode,

            ask::AskRequest,
            feedback::UpdateFeedbackRequest, feedback::UpdateFeedbackResponse,
            health::HealthResponse,

            Event, Role, Intent, HealthStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for the OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );

            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT Bearer token"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate the OpenAPI spec as a JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }

    /// Generate the OpenAPI spec as a YAML string.
    pub fn to_yaml() -> Result<String, String> {
        let openapi = Self::openapi();
        serde_yaml::to_string(&openapi).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();

        assert_eq!(openapi.info.title, "Query Orchestration API");
        assert_eq!(openapi.info.version, "0.1.0");

        let servers = openapi.servers.as_ref().ok_or_else(|| "OpenAPI servers missing".to_string())?;
        assert_eq!(servers.len(), 2);

        let tags = openapi.tags.as_ref().ok_or_else(|| "OpenAPI tags missing".to_string())?;
        assert_eq!(tags.len(), 2);

        let components = openapi.components.as_ref().ok_or_else(|| "OpenAPI components missing".to_string())?;
        assert!(components.security_schemes.contains_key("api_key"));
        assert!(components.security_schemes.contains_key("bearer_auth"));
        Ok(())
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;

        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;

        assert!(json.contains("Query Orchestration API"));
        assert!(json.contains("\"api_key\""));
        assert!(json.contains("\"bearer_auth\""));
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();

        assert!(!openapi.paths.paths.is_empty());
        assert!(openapi.paths.paths.contains_key("/api/v1/ask"));
        assert!(openapi.paths.paths.contains_key("/api/v1/feedback"));
        assert!(openapi.paths.paths.contains_key("/health"));
        assert!(openapi.paths.paths.contains_key("/health/ready"));
    }
}
