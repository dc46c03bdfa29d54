//! Hook event receiver for the ingestion gateway.
//!
//! The body is taken as raw bytes so that malformed JSON still gets a
//! ledger row and an INVALID outcome instead of an anonymous framework
//! rejection. Authentication failures are the one exception: they are
//! rejected before any ledger write.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use scribe_types::EventStatus;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Response body for hook ingestion.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookIngestResponse {
    pub success: bool,
    pub request_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/hooks - ingest one hook event.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<HookIngestResponse>), (StatusCode, String)> {
    // Bearer auth first; an unauthenticated request never reaches the
    // ledger.
    if let Some(expected) = &state.config.auth_token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);
        if !authorized {
            warn!(target: "scribe::gateway", "Rejecting request with missing or bad bearer token");
            return Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()));
        }
    }

    let request_id = resolve_request_id(&headers, &body);
    debug!(target: "scribe::gateway", "Received hook request {}", request_id);

    let reply = state
        .gateway
        .ingest(&request_id, &body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let http_status = match reply.status {
        EventStatus::Invalid => StatusCode::BAD_REQUEST,
        // Processing failures are terminal in the ledger but still
        // acknowledged; the sender must not retry into a loop.
        _ => StatusCode::OK,
    };

    let response = HookIngestResponse {
        success: matches!(
            reply.status,
            EventStatus::Success | EventStatus::Duplicate | EventStatus::Processing
        ),
        request_id: reply.request_id,
        status: reply.status.as_str(),
        conversation_id: reply.conversation_id,
        message_id: reply.message_id,
        tool_use_id: reply.tool_use_id,
        error_code: reply.error_code,
        error: reply.error_message,
    };
    Ok((http_status, Json(response)))
}

/// Idempotency key resolution: `x-request-id` header, then the body's
/// `requestId` field, then a generated id (which disables cross-retry
/// dedup but keeps the ledger complete).
fn resolve_request_id(headers: &HeaderMap, body: &[u8]) -> String {
    if let Some(id) = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return id.to_string();
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(id) = value
            .get("requestId")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return id.to_string();
        }
    }

    Uuid::new_v4().to_string()
}
