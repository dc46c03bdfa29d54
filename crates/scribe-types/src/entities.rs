//! Durable entities persisted by the ingestion gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ToolCategory;

/// One conversation per external session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// External CLI session id. Unique across the store.
    pub session_id: String,
    pub title: String,
    /// True once a real title has been derived from a prompt.
    pub has_real_title: bool,
    pub model: Option<String>,
    pub working_dir: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Conversation {
    pub fn new(session_id: String, started_at: DateTime<Utc>) -> Self {
        let title = format!("Session {}", started_at.format("%Y-%m-%d %H:%M"));
        Self {
            id: Uuid::new_v4(),
            session_id,
            title,
            has_real_title: false,
            model: None,
            working_dir: None,
            started_at,
            ended_at: None,
            total_cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Links a message to the tool call that triggered it, when known.
    pub parent_tool_use_id: Option<String>,
    /// Signature used to deduplicate transcript reconciliation inserts.
    pub dedup_signature: String,
}

impl StoredMessage {
    pub fn new(
        conversation_id: Uuid,
        role: MessageRole,
        text: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let dedup_signature = dedup_signature(role.as_str(), &text, timestamp);
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            text,
            timestamp,
            parent_tool_use_id: None,
            dedup_signature,
        }
    }
}

/// Signature for reconciliation dedup: role + content prefix + timestamp.
pub fn dedup_signature(role: &str, text: &str, timestamp: DateTime<Utc>) -> String {
    use sha2::{Digest, Sha256};
    let prefix: String = text.chars().take(64).collect();
    let mut hasher = Sha256::new();
    hasher.update(role.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(prefix.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(timestamp.timestamp_millis().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// A persisted, resolved tool use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Owning message (the assistant message that emitted the call).
    pub message_id: Uuid,
    /// The CLI's tool-call id. Unique within a conversation.
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub is_error: bool,
    pub category: ToolCategory,
    pub timestamp: DateTime<Utc>,
}

/// Webhook event lifecycle states.
///
/// `Pending → Processing → {Success | Error | Invalid | Duplicate}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Success,
    Error,
    Invalid,
    Duplicate,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Success => "success",
            EventStatus::Error => "error",
            EventStatus::Invalid => "invalid",
            EventStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "invalid" => Some(Self::Invalid),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending | EventStatus::Processing)
    }
}

/// Audit-ledger row for one gateway request. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    /// Idempotency key. Unique across the store.
    pub request_id: String,
    pub event_type: String,
    pub session_id: String,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<u64>,
    pub conversation_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub tool_use_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

impl WebhookEvent {
    pub fn new(request_id: String, event_type: String, session_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            event_type,
            session_id,
            status: EventStatus::Pending,
            received_at: Utc::now(),
            processed_at: None,
            processing_ms: None,
            conversation_id: None,
            message_id: None,
            tool_use_id: None,
            error_message: None,
            error_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Processing.is_terminal());
        assert!(EventStatus::Success.is_terminal());
        assert!(EventStatus::Error.is_terminal());
        assert!(EventStatus::Invalid.is_terminal());
        assert!(EventStatus::Duplicate.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            EventStatus::Pending,
            EventStatus::Processing,
            EventStatus::Success,
            EventStatus::Error,
            EventStatus::Invalid,
            EventStatus::Duplicate,
        ] {
            assert_eq!(EventStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_dedup_signature_stable() {
        let ts = Utc::now();
        let a = dedup_signature("user", "hello world", ts);
        let b = dedup_signature("user", "hello world", ts);
        assert_eq!(a, b);
        // Only the first 64 chars of content participate.
        let long = format!("{}{}", "x".repeat(64), "tail-a");
        let long2 = format!("{}{}", "x".repeat(64), "tail-b");
        assert_eq!(
            dedup_signature("user", &long, ts),
            dedup_signature("user", &long2, ts)
        );
        assert_ne!(a, dedup_signature("assistant", "hello world", ts));
    }
}
