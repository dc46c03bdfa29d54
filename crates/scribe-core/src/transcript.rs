//! Session transcripts: NDJSON spool files written at finalization and
//! read back during session-end reconciliation.
//!
//! One JSON object per line. Both ends of the format live here so the
//! writer and reader cannot drift apart.

use crate::{Result, ScribeError};
use chrono::{DateTime, Utc};
use scribe_types::CapturedSession;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One line of a transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Message {
        role: String,
        text: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        input: Value,
        output: Value,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Write a finalized session to a transcript file, messages in arrival
/// order followed by resolved tool calls.
pub fn write_transcript(path: &Path, session: &CapturedSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    for message in &session.messages {
        let entry = TranscriptEntry::Message {
            role: message.role.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
            parent_tool_use_id: message.parent_tool_use_id.clone(),
        };
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
    }

    for call in &session.tool_calls {
        let entry = TranscriptEntry::ToolUse {
            tool_use_id: call.tool_use_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            output: call.output.clone(),
            is_error: !call.success,
            timestamp: session.finalized_at,
        };
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    tracing::debug!(
        target: "scribe::transcript",
        "Wrote transcript for session {} to {:?} ({} messages, {} tool calls)",
        session.session_id,
        path,
        session.messages.len(),
        session.tool_calls.len()
    );
    Ok(())
}

/// Read a transcript file. Malformed lines are logged and skipped; a
/// missing file is an error.
pub fn read_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    if !path.exists() {
        return Err(ScribeError::TranscriptError(format!(
            "transcript not found: {}",
            path.display()
        )));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    target: "scribe::transcript",
                    "Skipping malformed transcript line {} in {:?}: {}",
                    line_no + 1,
                    path,
                    e
                );
            }
        }
    }

    if skipped > 0 {
        tracing::warn!(
            target: "scribe::transcript",
            "Transcript {:?}: {} malformed line(s) skipped",
            path,
            skipped
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_types::{
        CapturedMessage, CompletedToolCall, SessionOutcome, ToolCategory, ToolComplexity,
        ToolImpact,
    };
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_session() -> CapturedSession {
        let now = Utc::now();
        CapturedSession {
            session_id: "s1".into(),
            title: "fix the bug".into(),
            model: Some("opus".into()),
            tools: vec!["Read".into()],
            permission_mode: None,
            working_dir: None,
            messages: vec![
                CapturedMessage {
                    role: "user".into(),
                    text: "fix the bug".into(),
                    uuid: None,
                    parent_tool_use_id: None,
                    timestamp: now,
                },
                CapturedMessage {
                    role: "assistant".into(),
                    text: "Looking now.".into(),
                    uuid: Some("u1".into()),
                    parent_tool_use_id: None,
                    timestamp: now,
                },
            ],
            tool_calls: vec![CompletedToolCall {
                tool_use_id: "t1".into(),
                tool_name: "Read".into(),
                input: json!({"file_path": "/a.rs"}),
                output: json!("contents"),
                success: true,
                category: ToolCategory::FileSystem,
                impact: ToolImpact::Low,
                complexity: ToolComplexity::Simple,
                message_uuid: Some("u1".into()),
            }],
            dangling_tool_calls: vec![],
            outcome: SessionOutcome::Completed,
            is_complete: true,
            total_cost_usd: 0.01,
            input_tokens: 10,
            output_tokens: 20,
            cost_per_token: Some(0.01 / 30.0),
            num_turns: 2,
            duration_ms: 900,
            spawned_at: now,
            finalized_at: now,
            diagnostics: vec![],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");

        write_transcript(&path, &sample_session()).unwrap();
        let entries = read_transcript(&path).unwrap();

        assert_eq!(entries.len(), 3);
        assert!(matches!(
            &entries[0],
            TranscriptEntry::Message { role, .. } if role == "user"
        ));
        assert!(matches!(
            &entries[2],
            TranscriptEntry::ToolUse { tool_use_id, is_error, .. }
                if tool_use_id == "t1" && !is_error
        ));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"type":"message","role":"user","text":"hi","timestamp":"2026-01-01T00:00:00Z"}"#,
                "\n",
                "not json\n",
                "\n",
                r#"{"type":"unheard_of","x":1}"#,
                "\n",
            ),
        )
        .unwrap();

        let entries = read_transcript(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = read_transcript(&dir.path().join("nope.jsonl")).unwrap_err();
        assert!(matches!(err, ScribeError::TranscriptError(_)));
    }
}
