//! Envelope types for the CLI's stream-json output.
//!
//! Matches the line format emitted by the external assistant CLI when run
//! with `-p --verbose --output-format stream-json`: one JSON object per
//! line, discriminated by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// One decoded line of the streaming protocol.
///
/// The set is closed: a line whose `type` tag is not recognized decodes to
/// [`Envelope::Unknown`] so the pipeline degrades instead of crashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Session initialization with model and tool metadata.
    Init(InitEnvelope),
    /// User turn: text and/or tool_result blocks.
    User(UserEnvelope),
    /// Assistant turn: text and/or tool_use blocks.
    Assistant(AssistantEnvelope),
    /// Terminal summary for the session.
    Result(ResultEnvelope),
    /// Unrecognized discriminator, kept for diagnostics.
    #[serde(skip_deserializing)]
    Unknown { kind: String, raw: Value },
}

impl Envelope {
    /// Session id carried by the envelope, when present.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Envelope::Init(e) => Some(&e.session_id),
            Envelope::User(e) => Some(&e.session_id),
            Envelope::Assistant(e) => Some(&e.session_id),
            Envelope::Result(e) => Some(&e.session_id),
            Envelope::Unknown { .. } => None,
        }
    }
}

/// Session metadata emitted once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitEnvelope {
    pub session_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
    #[serde(flatten)]
    pub extra: Value,
}

/// User envelope wrapping a message with content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub session_id: String,
    pub message: ProtocolMessage,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// Assistant envelope wrapping a message with content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantEnvelope {
    pub session_id: String,
    pub message: ProtocolMessage,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// The message object inside user/assistant envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Value,
}

/// Content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// Terminal result envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub session_id: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub permission_denials: Vec<Value>,
    #[serde(flatten)]
    pub extra: Value,
}

/// Token usage attached to messages and results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(flatten)]
    pub extra: Value,
}

impl TokenUsage {
    /// Input + output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
