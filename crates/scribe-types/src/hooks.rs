//! Types for hook events delivered to the ingestion gateway.
//!
//! Hook events arrive as HTTP POST bodies, either forwarded by the capture
//! client after a supervised session finalizes or emitted live by the CLI's
//! own hook mechanism. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw webhook request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookRequest {
    /// Event discriminator: `session-start`, `prompt-submit`,
    /// `post-tool-use`, `session-end`.
    pub event: String,

    /// Client-side event timestamp.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// The external CLI's session id.
    #[serde(rename = "sessionId")]
    pub session_id: String,

    /// Client-supplied idempotency key. Falls back to the
    /// `x-request-id` header, then to a generated id.
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,

    // session-start fields
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub source: Option<String>,

    // prompt-submit fields
    #[serde(default)]
    pub prompt: Option<String>,

    // post-tool-use fields
    #[serde(default, rename = "toolName")]
    pub tool_name: Option<String>,
    #[serde(default, rename = "toolInput")]
    pub tool_input: Option<Value>,
    #[serde(default, rename = "toolResponse")]
    pub tool_response: Option<Value>,
    #[serde(default, rename = "toolUseId")]
    pub tool_use_id: Option<String>,

    // session-end fields
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, rename = "transcriptPath")]
    pub transcript_path: Option<String>,
    #[serde(default, rename = "totalCostUsd")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, rename = "inputTokens")]
    pub input_tokens: Option<u64>,
    #[serde(default, rename = "outputTokens")]
    pub output_tokens: Option<u64>,
}

/// Enumeration of hook event types the gateway dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEventType {
    SessionStart,
    PromptSubmit,
    PostToolUse,
    SessionEnd,
}

impl HookEventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session-start" => Some(Self::SessionStart),
            "prompt-submit" => Some(Self::PromptSubmit),
            "post-tool-use" => Some(Self::PostToolUse),
            "session-end" => Some(Self::SessionEnd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session-start",
            Self::PromptSubmit => "prompt-submit",
            Self::PostToolUse => "post-tool-use",
            Self::SessionEnd => "session-end",
        }
    }
}

/// Validated hook event, ready for the gateway's per-type handlers.
#[derive(Debug, Clone)]
pub enum HookEvent {
    SessionStart {
        session_id: String,
        model: Option<String>,
        cwd: Option<String>,
        source: Option<String>,
        timestamp: DateTime<Utc>,
    },
    PromptSubmit {
        session_id: String,
        prompt: String,
        timestamp: DateTime<Utc>,
    },
    PostToolUse {
        session_id: String,
        tool_name: String,
        tool_input: Value,
        tool_response: Value,
        tool_use_id: String,
        timestamp: DateTime<Utc>,
    },
    SessionEnd {
        session_id: String,
        reason: Option<String>,
        transcript_path: Option<String>,
        total_cost_usd: Option<f64>,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        timestamp: DateTime<Utc>,
    },
}

impl HookEvent {
    pub fn event_type(&self) -> HookEventType {
        match self {
            HookEvent::SessionStart { .. } => HookEventType::SessionStart,
            HookEvent::PromptSubmit { .. } => HookEventType::PromptSubmit,
            HookEvent::PostToolUse { .. } => HookEventType::PostToolUse,
            HookEvent::SessionEnd { .. } => HookEventType::SessionEnd,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            HookEvent::SessionStart { session_id, .. }
            | HookEvent::PromptSubmit { session_id, .. }
            | HookEvent::PostToolUse { session_id, .. }
            | HookEvent::SessionEnd { session_id, .. } => session_id,
        }
    }
}

/// Why a hook request failed validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookValidationError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("sessionId must not be empty")]
    EmptySessionId,
    #[error("{field} exceeds maximum size ({actual} > {limit} bytes)")]
    FieldTooLarge {
        field: &'static str,
        actual: usize,
        limit: usize,
    },
}

/// Maximum accepted prompt length in bytes.
pub const MAX_PROMPT_BYTES: usize = 100_000;
/// Maximum accepted tool input length in bytes (serialized).
pub const MAX_TOOL_INPUT_BYTES: usize = 262_144;
/// Maximum accepted tool response length in bytes (serialized).
pub const MAX_TOOL_RESPONSE_BYTES: usize = 1_048_576;

impl TryFrom<HookRequest> for HookEvent {
    type Error = HookValidationError;

    fn try_from(r: HookRequest) -> Result<Self, Self::Error> {
        if r.session_id.is_empty() {
            return Err(HookValidationError::EmptySessionId);
        }
        let event_type = HookEventType::parse(&r.event)
            .ok_or_else(|| HookValidationError::UnknownEventType(r.event.clone()))?;
        let session_id = r.session_id;
        let timestamp = r.timestamp.unwrap_or_else(Utc::now);

        match event_type {
            HookEventType::SessionStart => Ok(HookEvent::SessionStart {
                session_id,
                model: r.model,
                cwd: r.cwd,
                source: r.source,
                timestamp,
            }),

            HookEventType::PromptSubmit => {
                let prompt = r
                    .prompt
                    .ok_or(HookValidationError::MissingField("prompt"))?;
                check_size("prompt", prompt.len(), MAX_PROMPT_BYTES)?;
                Ok(HookEvent::PromptSubmit {
                    session_id,
                    prompt,
                    timestamp,
                })
            }

            HookEventType::PostToolUse => {
                let tool_name = r
                    .tool_name
                    .ok_or(HookValidationError::MissingField("toolName"))?;
                let tool_use_id = r
                    .tool_use_id
                    .ok_or(HookValidationError::MissingField("toolUseId"))?;
                let tool_input = r.tool_input.unwrap_or(Value::Null);
                let tool_response = r.tool_response.unwrap_or(Value::Null);
                check_size("toolInput", json_len(&tool_input), MAX_TOOL_INPUT_BYTES)?;
                check_size(
                    "toolResponse",
                    json_len(&tool_response),
                    MAX_TOOL_RESPONSE_BYTES,
                )?;
                Ok(HookEvent::PostToolUse {
                    session_id,
                    tool_name,
                    tool_input,
                    tool_response,
                    tool_use_id,
                    timestamp,
                })
            }

            HookEventType::SessionEnd => Ok(HookEvent::SessionEnd {
                session_id,
                reason: r.reason,
                transcript_path: r.transcript_path,
                total_cost_usd: r.total_cost_usd,
                input_tokens: r.input_tokens,
                output_tokens: r.output_tokens,
                timestamp,
            }),
        }
    }
}

fn check_size(
    field: &'static str,
    actual: usize,
    limit: usize,
) -> Result<(), HookValidationError> {
    if actual > limit {
        Err(HookValidationError::FieldTooLarge {
            field,
            actual,
            limit,
        })
    } else {
        Ok(())
    }
}

fn json_len(v: &Value) -> usize {
    serde_json::to_string(v).map(|s| s.len()).unwrap_or(0)
}
