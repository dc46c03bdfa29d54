//! Integration tests for the hook ingestion pipeline.
//!
//! Exercises the HTTP surface end to end: authentication, request id
//! resolution, the event state machine, and entity idempotency under
//! retries and duplicate deliveries.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::post,
    Router,
};
use scribe_server::{config::Config, routes, state::AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(temp_dir: &TempDir, auth_token: Option<&str>) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        cli_path: "/usr/bin/true".into(),
        db_path: temp_dir.path().join("test.db"),
        spool_dir: temp_dir.path().join("spool"),
        auth_token: auth_token.map(String::from),
        allowed_origins: vec![],
        forward_url: None,
    }
}

fn create_test_app(auth_token: Option<&str>) -> (Router, Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, auth_token);
    let state = Arc::new(AppState::new(config).expect("Failed to create AppState"));

    let app = Router::new()
        .route("/api/hooks", post(routes::hooks::receive))
        .with_state(state.clone());

    (app, state, temp_dir)
}

async fn send(
    app: &Router,
    request_id: Option<&str>,
    bearer: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/hooks")
        .header("content-type", "application/json");
    if let Some(id) = request_id {
        builder = builder.header("x-request-id", id);
    }
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_retry_with_same_request_id_creates_one_entity_set() {
    let (app, state, _temp) = create_test_app(None);

    let payload = json!({
        "event": "prompt-submit",
        "sessionId": "s1",
        "prompt": "please fix the race in the uploader"
    });

    let (status, first) = send(&app, Some("req-1"), None, payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "success");

    let (status, second) = send(&app, Some("req-1"), None, payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["conversationId"], first["conversationId"]);
    assert_eq!(second["messageId"], first["messageId"]);

    let conv = state
        .gateway
        .store()
        .find_conversation_by_session("s1")
        .unwrap()
        .unwrap();
    assert_eq!(state.gateway.store().message_count(conv.id).unwrap(), 1);
}

#[tokio::test]
async fn test_second_session_start_is_duplicate() {
    let (app, state, _temp) = create_test_app(None);

    let payload = json!({"event": "session-start", "sessionId": "s1", "model": "opus"});
    let (_, first) = send(&app, Some("req-1"), None, payload.clone()).await;
    assert_eq!(first["status"], "success");

    let (status, second) = send(&app, Some("req-2"), None, payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["conversationId"], first["conversationId"]);

    let store = state.gateway.store();
    assert_eq!(store.list_conversations().unwrap().len(), 1);
    // Both requests are in the ledger with distinct terminal states.
    let events = store.list_webhook_events("s1").unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_invalid_json_records_invalid_event() {
    let (app, state, _temp) = create_test_app(None);

    let request = Request::builder()
        .method("POST")
        .uri("/api/hooks")
        .header("content-type", "application/json")
        .header("x-request-id", "req-bad")
        .body(Body::from("{definitely not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let event = state
        .gateway
        .store()
        .find_webhook_event("req-bad")
        .unwrap()
        .unwrap();
    assert_eq!(event.status.as_str(), "invalid");
    assert_eq!(event.error_code.as_deref(), Some("MALFORMED_JSON"));
}

#[tokio::test]
async fn test_oversized_prompt_rejected_without_entities() {
    let (app, state, _temp) = create_test_app(None);

    let payload = json!({
        "event": "prompt-submit",
        "sessionId": "s1",
        "prompt": "x".repeat(100_001)
    });
    let (status, body) = send(&app, Some("req-1"), None, payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid");
    assert_eq!(body["errorCode"], "VALIDATION_FAILED");

    assert!(state
        .gateway
        .store()
        .find_conversation_by_session("s1")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missing_bearer_token_rejected_before_ledger() {
    let (app, state, _temp) = create_test_app(Some("secret"));

    let payload = json!({"event": "session-start", "sessionId": "s1"});
    let (status, _) = send(&app, Some("req-1"), None, payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Some("req-1"), Some("wrong"), payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No ledger row was written for the rejected attempts.
    assert!(state
        .gateway
        .store()
        .find_webhook_event("req-1")
        .unwrap()
        .is_none());

    // The correct token goes through.
    let (status, body) = send(&app, Some("req-1"), Some("secret"), payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_post_tool_use_attaches_to_latest_assistant_message() {
    let (app, state, _temp) = create_test_app(None);

    send(
        &app,
        Some("req-1"),
        None,
        json!({"event": "session-start", "sessionId": "s1"}),
    )
    .await;

    // Without an assistant message the tool use has no parent.
    let tool_payload = json!({
        "event": "post-tool-use",
        "sessionId": "s1",
        "toolName": "Bash",
        "toolUseId": "t1",
        "toolInput": {"command": "cargo test"},
        "toolResponse": "all green"
    });
    let (status, body) = send(&app, Some("req-2"), None, tool_payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["errorCode"], "NO_ASSISTANT_MESSAGE");

    // Seed an assistant message, then retry the same request id.
    let store = state.gateway.store();
    let conv = store.find_conversation_by_session("s1").unwrap().unwrap();
    store
        .insert_message(&scribe_types::StoredMessage::new(
            conv.id,
            scribe_types::MessageRole::Assistant,
            "Running the tests now.".into(),
            chrono::Utc::now(),
        ))
        .unwrap();

    let (status, body) = send(&app, Some("req-2"), None, tool_payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["toolUseId"].is_string());

    // A duplicate delivery under a fresh request id converges on the same
    // tool use row.
    let (_, dup) = send(&app, Some("req-3"), None, tool_payload).await;
    assert_eq!(dup["status"], "duplicate");
    assert_eq!(dup["toolUseId"], body["toolUseId"]);
    assert_eq!(store.tool_use_count(conv.id).unwrap(), 1);
}

#[tokio::test]
async fn test_session_end_closes_conversation_and_reconciles() {
    let (app, state, temp) = create_test_app(None);

    send(
        &app,
        Some("req-1"),
        None,
        json!({
            "event": "prompt-submit",
            "sessionId": "s1",
            "prompt": "summarize the repo layout"
        }),
    )
    .await;

    // Transcript holding the assistant side of the exchange.
    let transcript = temp.path().join("s1.jsonl");
    std::fs::write(
        &transcript,
        concat!(
            r#"{"type":"message","role":"assistant","text":"The repo has three crates.","timestamp":"2026-03-01T12:00:00Z"}"#,
            "\n",
            r#"{"type":"tool_use","tool_use_id":"t1","tool_name":"Glob","input":{"pattern":"crates/*"},"output":"crates/a crates/b","is_error":false,"timestamp":"2026-03-01T12:00:01Z"}"#,
            "\n",
        ),
    )
    .unwrap();

    let end = json!({
        "event": "session-end",
        "sessionId": "s1",
        "reason": "completed",
        "transcriptPath": transcript.to_str().unwrap(),
        "totalCostUsd": 0.05,
        "inputTokens": 100,
        "outputTokens": 200
    });
    let (status, body) = send(&app, Some("req-2"), None, end.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let store = state.gateway.store();
    let conv = store.find_conversation_by_session("s1").unwrap().unwrap();
    assert!(conv.ended_at.is_some());
    assert_eq!(conv.total_cost_usd, 0.05);
    assert_eq!(conv.input_tokens, 100);
    assert_eq!(store.message_count(conv.id).unwrap(), 2);
    assert_eq!(store.tool_use_count(conv.id).unwrap(), 1);

    // A second reconciliation pass inserts nothing.
    let (_, replay) = send(&app, Some("req-3"), None, end).await;
    assert_eq!(replay["status"], "success");
    assert_eq!(store.message_count(conv.id).unwrap(), 2);
    assert_eq!(store.tool_use_count(conv.id).unwrap(), 1);
}

#[tokio::test]
async fn test_request_id_from_body_when_header_missing() {
    let (app, state, _temp) = create_test_app(None);

    let payload = json!({
        "event": "session-start",
        "sessionId": "s1",
        "requestId": "body-req-9"
    });
    let (status, body) = send(&app, None, None, payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestId"], "body-req-9");

    assert!(state
        .gateway
        .store()
        .find_webhook_event("body-req-9")
        .unwrap()
        .is_some());
}
