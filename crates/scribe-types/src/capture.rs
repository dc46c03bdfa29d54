//! Capture-side records: tool classification and finalized sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse grouping of tools by what they touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileSystem,
    CodeExecution,
    Search,
    WebRequest,
    McpTool,
    Unknown,
}

impl ToolCategory {
    /// Derive the category from a tool name.
    pub fn from_tool_name(name: &str) -> Self {
        if name.starts_with("mcp__") {
            return ToolCategory::McpTool;
        }
        match name {
            "Read" | "Write" | "Edit" | "NotebookEdit" => ToolCategory::FileSystem,
            "Bash" | "BashOutput" | "KillShell" => ToolCategory::CodeExecution,
            "Grep" | "Glob" => ToolCategory::Search,
            "WebFetch" | "WebSearch" => ToolCategory::WebRequest,
            _ => ToolCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::FileSystem => "file_system",
            ToolCategory::CodeExecution => "code_execution",
            ToolCategory::Search => "search",
            ToolCategory::WebRequest => "web_request",
            ToolCategory::McpTool => "mcp_tool",
            ToolCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "file_system" => Self::FileSystem,
            "code_execution" => Self::CodeExecution,
            "search" => Self::Search,
            "web_request" => Self::WebRequest,
            "mcp_tool" => Self::McpTool,
            _ => Self::Unknown,
        }
    }
}

/// How much state a tool call can mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolImpact {
    Low,
    Medium,
    High,
}

impl ToolImpact {
    /// Read-only tools are low impact; write/execute tools are high.
    pub fn from_tool_name(name: &str) -> Self {
        match name {
            "Read" | "Grep" | "Glob" | "WebFetch" | "WebSearch" | "BashOutput" => ToolImpact::Low,
            "Write" | "Edit" | "NotebookEdit" | "Bash" | "KillShell" => ToolImpact::High,
            _ => ToolImpact::Medium,
        }
    }
}

/// Coarse complexity score from input payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolComplexity {
    Simple,
    Moderate,
    Complex,
}

impl ToolComplexity {
    pub fn from_input(input: &Value) -> Self {
        let size = serde_json::to_string(input).map(|s| s.len()).unwrap_or(0);
        if size < 256 {
            ToolComplexity::Simple
        } else if size < 4096 {
            ToolComplexity::Moderate
        } else {
            ToolComplexity::Complex
        }
    }
}

/// A tool call awaiting its result. Lives between the assistant message
/// that emits it and the user message that resolves it.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: Value,
    /// uuid of the assistant envelope that emitted the call.
    pub message_uuid: Option<String>,
    pub category: ToolCategory,
    pub impact: ToolImpact,
    pub complexity: ToolComplexity,
}

/// A tool call matched with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
    pub success: bool,
    pub category: ToolCategory,
    pub impact: ToolImpact,
    pub complexity: ToolComplexity,
    pub message_uuid: Option<String>,
}

/// One message accumulated during capture, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedMessage {
    pub role: String,
    pub text: String,
    pub uuid: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How a captured session terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Process exited normally.
    Completed,
    /// Explicit stop was requested.
    Stopped,
    /// Process exited non-zero or crashed.
    Failed,
}

/// Per-tool statistics for a finalized session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dangling: usize,
}

/// A finalized session produced by the assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedSession {
    pub session_id: String,
    pub title: String,
    pub model: Option<String>,
    pub tools: Vec<String>,
    pub permission_mode: Option<String>,
    pub working_dir: Option<String>,
    pub messages: Vec<CapturedMessage>,
    pub tool_calls: Vec<CompletedToolCall>,
    /// Tool calls that never received a result.
    pub dangling_tool_calls: Vec<String>,
    pub outcome: SessionOutcome,
    /// False when the terminal result envelope never arrived.
    pub is_complete: bool,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost divided by total tokens, when both are known.
    pub cost_per_token: Option<f64>,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub spawned_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    /// Raw stderr captured from the child process.
    pub diagnostics: Vec<String>,
}

impl CapturedSession {
    pub fn tool_stats(&self) -> ToolStats {
        ToolStats {
            total_calls: self.tool_calls.len() + self.dangling_tool_calls.len(),
            succeeded: self.tool_calls.iter().filter(|c| c.success).count(),
            failed: self.tool_calls.iter().filter(|c| !c.success).count(),
            dangling: self.dangling_tool_calls.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_from_tool_name() {
        assert_eq!(ToolCategory::from_tool_name("Read"), ToolCategory::FileSystem);
        assert_eq!(ToolCategory::from_tool_name("Bash"), ToolCategory::CodeExecution);
        assert_eq!(ToolCategory::from_tool_name("Grep"), ToolCategory::Search);
        assert_eq!(ToolCategory::from_tool_name("WebFetch"), ToolCategory::WebRequest);
        assert_eq!(
            ToolCategory::from_tool_name("mcp__playwright__navigate"),
            ToolCategory::McpTool
        );
        assert_eq!(ToolCategory::from_tool_name("FancyNewTool"), ToolCategory::Unknown);
    }

    #[test]
    fn test_impact_read_vs_write() {
        assert_eq!(ToolImpact::from_tool_name("Read"), ToolImpact::Low);
        assert_eq!(ToolImpact::from_tool_name("Write"), ToolImpact::High);
        assert_eq!(ToolImpact::from_tool_name("Bash"), ToolImpact::High);
        assert_eq!(ToolImpact::from_tool_name("Task"), ToolImpact::Medium);
    }

    #[test]
    fn test_complexity_from_input_size() {
        assert_eq!(
            ToolComplexity::from_input(&json!({"file_path": "/a"})),
            ToolComplexity::Simple
        );
        let medium = json!({"content": "x".repeat(1000)});
        assert_eq!(ToolComplexity::from_input(&medium), ToolComplexity::Moderate);
        let large = json!({"content": "x".repeat(10_000)});
        assert_eq!(ToolComplexity::from_input(&large), ToolComplexity::Complex);
    }
}
