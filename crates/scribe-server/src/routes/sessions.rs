//! Session management routes: spawn and stop supervised captures, list
//! what the gateway has ingested.

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use scribe_core::{RestartPolicy, ScribeError, SpawnOptions};
use scribe_types::{Conversation, WebhookEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub prompt: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Keep respawning the CLI per the default restart policy instead of
    /// running it once.
    #[serde(default)]
    pub monitor: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnResponse {
    pub session_id: String,
}

/// POST /api/sessions - spawn a supervised CLI capture.
pub async fn spawn(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpawnRequest>,
) -> Result<(StatusCode, Json<SpawnResponse>), (StatusCode, String)> {
    let session_id = Uuid::new_v4().to_string();

    let mut args = vec![req.prompt];
    args.extend(req.args);

    let opts = SpawnOptions {
        session_id: session_id.clone(),
        args,
        working_dir: req.working_dir.map(Into::into),
    };

    if req.monitor {
        let supervisor = state.supervisor.clone();
        let policy = RestartPolicy::default();
        let id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.run_monitored(opts, policy).await {
                tracing::error!(target: "scribe::api", "Monitored session {} failed: {}", id, e);
            }
        });
    } else {
        state.supervisor.spawn(opts).await.map_err(|e| match e {
            ScribeError::SessionAlreadyActive(_) => (StatusCode::CONFLICT, e.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;
    }

    info!(target: "scribe::api", "Spawned capture session {}", session_id);
    Ok((StatusCode::ACCEPTED, Json(SpawnResponse { session_id })))
}

/// DELETE /api/sessions/{id} - stop an active capture.
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.supervisor.stop(&session_id).await.map_err(|e| match e {
        ScribeError::SessionNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })?;
    info!(target: "scribe::api", "Stop requested for session {}", session_id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Whether a supervised process is currently running for this session.
    pub active: bool,
}

/// GET /api/sessions - ingested conversations, most recent first.
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    let conversations = state
        .gateway
        .store()
        .list_conversations()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let summaries = conversations
        .into_iter()
        .map(|conversation| {
            let active = state.supervisor.is_active(&conversation.session_id);
            SessionSummary {
                conversation,
                active,
            }
        })
        .collect();

    Ok(Json(summaries))
}

/// GET /api/sessions/{id}/events - the audit ledger for one session.
pub async fn events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<WebhookEvent>>, (StatusCode, String)> {
    let events = state
        .gateway
        .store()
        .list_webhook_events(&session_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(events))
}
