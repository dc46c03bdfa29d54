//! Tool call correlation for one session.
//!
//! Matches every tool_use block emitted by an assistant message with the
//! tool_result block that eventually resolves it, by tool-call id. Results
//! that arrive for calls this correlator never saw are logged and dropped.

use scribe_types::{
    CompletedToolCall, ContentBlock, Envelope, PendingToolCall, ToolCategory, ToolComplexity,
    ToolImpact,
};
use std::collections::HashMap;

/// Final report from a correlator when its session ends.
#[derive(Debug, Default)]
pub struct CorrelatorReport {
    /// Tool calls matched with a result, in completion order.
    pub completed: Vec<CompletedToolCall>,
    /// Tool-call ids that never received a result.
    pub dangling: Vec<String>,
}

/// Per-session matcher of tool invocations to their results.
#[derive(Debug, Default)]
pub struct ToolCallCorrelator {
    pending: HashMap<String, PendingToolCall>,
    completed: Vec<CompletedToolCall>,
}

impl ToolCallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one envelope through the correlator.
    pub fn observe(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::Assistant(a) => {
                for block in &a.message.content {
                    if let ContentBlock::ToolUse { id, name, input } = block {
                        self.track_tool_use(id, name, input, a.uuid.as_deref());
                    }
                }
            }
            Envelope::User(u) => {
                for block in &u.message.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        self.resolve_tool_use(tool_use_id, content, *is_error);
                    }
                }
            }
            _ => {}
        }
    }

    fn track_tool_use(
        &mut self,
        id: &str,
        name: &str,
        input: &serde_json::Value,
        message_uuid: Option<&str>,
    ) {
        if self.pending.contains_key(id) {
            tracing::warn!(
                target: "scribe::correlator",
                "Duplicate tool_use id {} ({}), replacing pending entry",
                id,
                name
            );
        }

        let pending = PendingToolCall {
            tool_use_id: id.to_string(),
            tool_name: name.to_string(),
            input: input.clone(),
            message_uuid: message_uuid.map(String::from),
            category: ToolCategory::from_tool_name(name),
            impact: ToolImpact::from_tool_name(name),
            complexity: ToolComplexity::from_input(input),
        };

        tracing::debug!(
            target: "scribe::correlator",
            "Tracking tool call {} ({}, {:?})",
            id,
            name,
            pending.category
        );
        self.pending.insert(id.to_string(), pending);
    }

    fn resolve_tool_use(&mut self, tool_use_id: &str, content: &serde_json::Value, is_error: bool) {
        let Some(pending) = self.pending.remove(tool_use_id) else {
            // Result for a call this correlator never saw.
            tracing::warn!(
                target: "scribe::correlator",
                "Dropping tool_result with no matching pending call: {}",
                tool_use_id
            );
            return;
        };

        tracing::debug!(
            target: "scribe::correlator",
            "Completed tool call {} ({}) error={}",
            tool_use_id,
            pending.tool_name,
            is_error
        );

        self.completed.push(CompletedToolCall {
            tool_use_id: pending.tool_use_id,
            tool_name: pending.tool_name,
            input: pending.input,
            output: content.clone(),
            success: !is_error,
            category: pending.category,
            impact: pending.impact,
            complexity: pending.complexity,
            message_uuid: pending.message_uuid,
        });
    }

    /// Number of calls still awaiting a result.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Finish the session: completed calls plus everything still dangling.
    pub fn finish(self) -> CorrelatorReport {
        let mut dangling: Vec<String> = self.pending.into_keys().collect();
        dangling.sort();

        if !dangling.is_empty() {
            tracing::warn!(
                target: "scribe::correlator",
                "{} tool call(s) dangling at session end: {:?}",
                dangling.len(),
                dangling
            );
        }

        CorrelatorReport {
            completed: self.completed,
            dangling,
        }
    }
}
