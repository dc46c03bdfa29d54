//! Session assembly: accumulates envelopes into one finalized summary.

use chrono::{DateTime, Utc};
use scribe_types::{
    CapturedMessage, CapturedSession, ContentBlock, Envelope, InitEnvelope, ResultEnvelope,
    SessionOutcome,
};

use crate::correlator::CorrelatorReport;

/// Minimum text length for a user message to qualify as a title source.
pub const TITLE_MIN_PROMPT_LEN: usize = 10;
/// Maximum title length before truncation.
pub const TITLE_MAX_LEN: usize = 50;

/// Accumulates init/result envelopes and messages for one session.
///
/// Tracks process-spawn time explicitly so a session that dies without a
/// terminal result envelope still gets a meaningful duration.
#[derive(Debug)]
pub struct SessionAssembler {
    session_id: String,
    spawned_at: DateTime<Utc>,
    init: Option<InitEnvelope>,
    result: Option<ResultEnvelope>,
    messages: Vec<CapturedMessage>,
    diagnostics: Vec<String>,
}

impl SessionAssembler {
    pub fn new(session_id: impl Into<String>, spawned_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            spawned_at,
            init: None,
            result: None,
            messages: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Feed one envelope into the assembler.
    pub fn observe(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::Init(init) => {
                if self.init.is_some() {
                    // First init wins.
                    tracing::warn!(
                        target: "scribe::assembler",
                        "Duplicate init envelope for session {}, ignoring",
                        self.session_id
                    );
                    return;
                }
                if self.session_id != init.session_id {
                    self.session_id = init.session_id.clone();
                }
                self.init = Some(init.clone());
            }

            Envelope::User(u) => {
                self.messages.push(CapturedMessage {
                    role: "user".to_string(),
                    text: text_of(&u.message.content),
                    uuid: u.uuid.clone(),
                    parent_tool_use_id: u.parent_tool_use_id.clone(),
                    timestamp: Utc::now(),
                });
            }

            Envelope::Assistant(a) => {
                self.messages.push(CapturedMessage {
                    role: "assistant".to_string(),
                    text: text_of(&a.message.content),
                    uuid: a.uuid.clone(),
                    parent_tool_use_id: a.parent_tool_use_id.clone(),
                    timestamp: Utc::now(),
                });
            }

            Envelope::Result(r) => {
                if self.result.is_some() {
                    tracing::warn!(
                        target: "scribe::assembler",
                        "Duplicate result envelope for session {}, ignoring",
                        self.session_id
                    );
                    return;
                }
                self.result = Some(r.clone());
            }

            Envelope::Unknown { kind, .. } => {
                tracing::debug!(
                    target: "scribe::assembler",
                    "Ignoring unknown envelope '{}' for session {}",
                    kind,
                    self.session_id
                );
            }
        }
    }

    /// Attach a captured stderr line as diagnostic output.
    pub fn push_diagnostic(&mut self, line: String) {
        self.diagnostics.push(line);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Finalize into a [`CapturedSession`]. Called exactly once, on process
    /// exit or stop. A missing result envelope yields `is_complete=false`
    /// with whatever partial data accumulated.
    pub fn finalize(self, outcome: SessionOutcome, report: CorrelatorReport) -> CapturedSession {
        let finalized_at = Utc::now();
        let is_complete = self.result.is_some();

        let (total_cost_usd, input_tokens, output_tokens, num_turns, duration_ms) =
            match &self.result {
                Some(r) => {
                    let usage = r.usage.clone().unwrap_or_default();
                    (
                        r.total_cost_usd,
                        usage.input_tokens,
                        usage.output_tokens,
                        r.num_turns,
                        r.duration_ms,
                    )
                }
                None => {
                    // No terminal result: duration from spawn wall-clock.
                    let elapsed = (finalized_at - self.spawned_at).num_milliseconds().max(0);
                    let turns = self.messages.iter().filter(|m| m.role == "user").count();
                    (0.0, 0, 0, turns as u32, elapsed as u64)
                }
            };

        let total_tokens = input_tokens + output_tokens;
        let cost_per_token = if total_tokens > 0 && total_cost_usd > 0.0 {
            Some(total_cost_usd / total_tokens as f64)
        } else {
            None
        };

        let title = derive_title(&self.messages)
            .unwrap_or_else(|| format!("Session {}", self.spawned_at.format("%Y-%m-%d %H:%M")));

        let (model, tools, permission_mode, working_dir) = match self.init {
            Some(init) => (
                Some(init.model),
                init.tools,
                init.permission_mode,
                init.cwd.map(|p| p.to_string_lossy().into_owned()),
            ),
            None => (None, Vec::new(), None, None),
        };

        tracing::info!(
            target: "scribe::assembler",
            "Finalized session {} ({:?}, complete={}, {} messages, {} tool calls, {} dangling)",
            self.session_id,
            outcome,
            is_complete,
            self.messages.len(),
            report.completed.len(),
            report.dangling.len()
        );

        CapturedSession {
            session_id: self.session_id,
            title,
            model,
            tools,
            permission_mode,
            working_dir,
            messages: self.messages,
            tool_calls: report.completed,
            dangling_tool_calls: report.dangling,
            outcome,
            is_complete,
            total_cost_usd,
            input_tokens,
            output_tokens,
            cost_per_token,
            num_turns,
            duration_ms,
            spawned_at: self.spawned_at,
            finalized_at,
            diagnostics: self.diagnostics,
        }
    }
}

/// Concatenated text blocks of a message.
fn text_of(content: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in content {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

/// Title heuristic: first sentence of the first user message whose text is
/// long enough, truncated to 50 chars with an ellipsis.
pub fn derive_title(messages: &[CapturedMessage]) -> Option<String> {
    let source = messages
        .iter()
        .find(|m| m.role == "user" && m.text.trim().len() >= TITLE_MIN_PROMPT_LEN)?;
    Some(title_from_prompt(source.text.trim()))
}

/// Build a conversation title from a prompt string.
pub fn title_from_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let sentence = trimmed
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(['.', '!', '?'])
        .trim();

    if sentence.chars().count() <= TITLE_MAX_LEN {
        sentence.to_string()
    } else {
        let cut: String = sentence.chars().take(TITLE_MAX_LEN).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::ToolCallCorrelator;
    use crate::parser::ProtocolParser;

    fn feed(
        parser: &mut ProtocolParser,
        correlator: &mut ToolCallCorrelator,
        assembler: &mut SessionAssembler,
        line: &str,
    ) {
        if let Some(envelope) = parser.parse_line(line) {
            correlator.observe(&envelope);
            assembler.observe(&envelope);
        }
    }

    #[test]
    fn test_end_to_end_capture() {
        let mut parser = ProtocolParser::new();
        let mut correlator = ToolCallCorrelator::new();
        let mut assembler = SessionAssembler::new("s1", Utc::now());

        let lines = [
            r#"{"type":"init","session_id":"s1","model":"opus","tools":["Read"]}"#,
            r#"{"type":"user","session_id":"s1","message":{"role":"user","content":[{"type":"text","text":"fix the bug in the parser please"}]}}"#,
            r#"{"type":"assistant","session_id":"s1","uuid":"u1","message":{"role":"assistant","content":[{"type":"text","text":"Let me look."},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/a.rs"}}]}}"#,
            r#"{"type":"user","session_id":"s1","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"fn main() {}"}]}}"#,
            r#"{"type":"result","session_id":"s1","subtype":"success","duration_ms":900,"num_turns":2,"total_cost_usd":0.01,"usage":{"input_tokens":10,"output_tokens":20}}"#,
        ];
        for line in lines {
            feed(&mut parser, &mut correlator, &mut assembler, line);
        }

        let session = assembler.finalize(SessionOutcome::Completed, correlator.finish());

        assert!(session.is_complete);
        assert_eq!(session.title, "fix the bug in the parser please");
        assert_eq!(session.model.as_deref(), Some("opus"));
        assert_eq!(session.total_cost_usd, 0.01);
        assert_eq!(session.input_tokens, 10);
        assert_eq!(session.output_tokens, 20);
        assert_eq!(session.tool_calls.len(), 1);
        assert!(session.tool_calls[0].success);
        assert_eq!(session.tool_calls[0].tool_use_id, "t1");
        assert!(session.dangling_tool_calls.is_empty());
        let cpt = session.cost_per_token.unwrap();
        assert!((cpt - 0.01 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_finalize_without_result_is_partial() {
        let spawned = Utc::now() - chrono::Duration::seconds(5);
        let mut assembler = SessionAssembler::new("s1", spawned);
        let mut parser = ProtocolParser::new();

        let line = r#"{"type":"user","session_id":"s1","message":{"role":"user","content":[{"type":"text","text":"do something useful here"}]}}"#;
        assembler.observe(&parser.parse_line(line).unwrap());

        let session = assembler.finalize(SessionOutcome::Failed, CorrelatorReport::default());
        assert!(!session.is_complete);
        assert_eq!(session.outcome, SessionOutcome::Failed);
        assert_eq!(session.messages.len(), 1);
        // Duration falls back to spawn wall-clock.
        assert!(session.duration_ms >= 5000);
        assert_eq!(session.num_turns, 1);
        assert!(session.cost_per_token.is_none());
    }

    #[test]
    fn test_first_init_wins() {
        let mut assembler = SessionAssembler::new("s1", Utc::now());
        let mut parser = ProtocolParser::new();

        let first = r#"{"type":"init","session_id":"s1","model":"opus"}"#;
        let second = r#"{"type":"init","session_id":"s1","model":"haiku"}"#;
        assembler.observe(&parser.parse_line(first).unwrap());
        assembler.observe(&parser.parse_line(second).unwrap());

        let session = assembler.finalize(SessionOutcome::Completed, CorrelatorReport::default());
        assert_eq!(session.model.as_deref(), Some("opus"));
    }

    #[test]
    fn test_title_first_sentence_truncated() {
        assert_eq!(
            title_from_prompt("Fix the login bug. Then add tests."),
            "Fix the login bug"
        );
        assert_eq!(title_from_prompt("why does this fail?"), "why does this fail");

        let long = "a".repeat(80);
        let title = title_from_prompt(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_LEN + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_title_fallback_when_no_qualifying_message() {
        let spawned = Utc::now();
        let mut assembler = SessionAssembler::new("s1", spawned);
        let mut parser = ProtocolParser::new();

        // Too short to qualify as a title source.
        let line = r#"{"type":"user","session_id":"s1","message":{"role":"user","content":[{"type":"text","text":"hi"}]}}"#;
        assembler.observe(&parser.parse_line(line).unwrap());

        let session = assembler.finalize(SessionOutcome::Completed, CorrelatorReport::default());
        assert!(session.title.starts_with("Session "));
    }

    #[test]
    fn test_diagnostics_attached() {
        let mut assembler = SessionAssembler::new("s1", Utc::now());
        assembler.push_diagnostic("warning: something odd".to_string());
        let session = assembler.finalize(SessionOutcome::Completed, CorrelatorReport::default());
        assert_eq!(session.diagnostics.len(), 1);
    }
}
