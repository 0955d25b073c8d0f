//! `POST /api/v1/feedback` -- `UpdateFeedback(query_id, rating, text?) -> bool`.

use axum::Json;
use serde::{Deserialize, Serialize};

use qorc_core::QueryId;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateFeedbackRequest {
    pub query_id: QueryId,
    /// Rating semantics fixed: 5 = positive, 1 = negative.
    pub rating: u8,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateFeedbackResponse {
    pub success: bool,
}

/// `UpdateFeedback(query_id, rating ∈ {1,5}, optional text) -> bool`.
///
/// Feedback is recorded via structured logging, the non-blocking sink a
/// concrete audit-log implementation would also observe (the audit-log sink
/// itself is a pluggable oracle, out of scope for this crate).
#[cfg_attr(
    feature = "openapi",
    utoipa::path(
        post,
        path = "/api/v1/feedback",
        request_body = UpdateFeedbackRequest,
        responses((status = 200, description = "Feedback recorded", body = UpdateFeedbackResponse)),
        security(("api_key" = []), ("bearer_auth" = [])),
        tag = "Query"
    )
)]
pub async fn update_feedback(
    AuthExtractor(auth): AuthExtractor,
    Json(body): Json<UpdateFeedbackRequest>,
) -> ApiResult<Json<UpdateFeedbackResponse>> {
    if body.rating != 1 && body.rating != 5 {
        return Err(ApiError::invalid_range("rating", 1, 5));
    }

    tracing::info!(
        query_id = %body.query_id,
        user_id = %auth.user_id,
        tenant_id = %auth.tenant_id,
        rating = body.rating,
        has_text = body.text.is_some(),
        "feedback recorded"
    );

    Ok(Json(UpdateFeedbackResponse { success: true }))
}
