//! `POST /api/v1/ask` -- streams the orchestrator's event stream back as SSE.

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use qorc_core::orchestrator::Orchestrator;
use qorc_core::Request as CoreRequest;

use crate::middleware::AuthExtractor;

/// Client-supplied fields of an ask request. `user_id`, `tenant_id`, and
/// `role` come from the authenticated [`qorc_core::Role`]-bearing
/// [`crate::auth::AuthContext`], never from the request body -- a client
/// cannot claim a role or tenant it wasn't authenticated with.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub manual_agent: Option<String>,
    #[serde(default = "default_context_limit")]
    pub context_limit: u8,
    #[serde(default)]
    pub bypass_cache: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub thread_context: Option<String>,
    #[serde(default)]
    pub file_context: Option<String>,
}

fn default_context_limit() -> u8 {
    5
}

/// `Ask(Request) -> Stream<Event>` (spec.md's abstract transport-agnostic
/// endpoint), realized here as SSE. Each frame is an [`qorc_core::Event`]'s
/// JSON serialization; the terminal `Done`/`Error` frame closes the stream.
#[cfg_attr(
    feature = "openapi",
    utoipa::path(
        post,
        path = "/api/v1/ask",
        request_body = AskRequest,
        responses((status = 200, description = "SSE stream of orchestrator events", content_type = "text/event-stream")),
        security(("api_key" = []), ("bearer_auth" = [])),
        tag = "Query"
    )
)]
pub async fn ask(
    State(orchestrator): State<Arc<Orchestrator>>,
    AuthExtractor(auth): AuthExtractor,
    Json(body): Json<AskRequest>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let request = CoreRequest {
        query: body.query,
        user_id: auth.user_id.clone(),
        tenant_id: auth.tenant_id,
        role: auth.role(),
        manual_agent: body.manual_agent,
        context_limit: body.context_limit,
        bypass_cache: body.bypass_cache,
        conversation_id: body.conversation_id,
        thread_context: body.thread_context,
        file_context: body.file_context,
    };

    let receiver = orchestrator.execute(request);
    let stream = ReceiverStream::new(receiver).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize orchestrator event");
            "{}".to_string()
        });
        Ok(SseEvent::default().data(data))
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
