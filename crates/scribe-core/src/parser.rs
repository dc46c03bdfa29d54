//! Parser for the CLI's stream-json output.

use scribe_types::Envelope;

/// Decodes lines of the streaming protocol into typed envelopes.
///
/// Each line is parsed independently; a malformed or non-JSON line is
/// logged and skipped, never fatal to the stream. Lines with an
/// unrecognized `type` discriminator map to [`Envelope::Unknown`].
#[derive(Debug, Default)]
pub struct ProtocolParser {
    /// Buffer for incomplete lines across chunk reads.
    buffer: String,
}

impl ProtocolParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line into an envelope, or None for a skipped line.
    pub fn parse_line(&mut self, line: &str) -> Option<Envelope> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_str::<Envelope>(trimmed) {
            Ok(envelope) => Some(envelope),
            Err(_) => {
                // A decode failure is either an unknown discriminator or a
                // genuinely malformed line. Re-parse as a raw value to tell
                // them apart.
                let raw: serde_json::Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(
                            target: "scribe::parser",
                            "Skipping non-JSON line: {}: {}",
                            e,
                            truncate(trimmed, 120)
                        );
                        return None;
                    }
                };

                match raw.get("type").and_then(|t| t.as_str()) {
                    Some(kind) => {
                        tracing::debug!(
                            target: "scribe::parser",
                            "Unknown envelope type '{}'",
                            kind
                        );
                        Some(Envelope::Unknown {
                            kind: kind.to_string(),
                            raw,
                        })
                    }
                    None => {
                        tracing::debug!(
                            target: "scribe::parser",
                            "Skipping JSON line without a type tag: {}",
                            truncate(trimmed, 120)
                        );
                        None
                    }
                }
            }
        }
    }

    /// Parse streaming data that may contain partial lines.
    pub fn parse_chunk(&mut self, chunk: &str) -> Vec<Envelope> {
        self.buffer.push_str(chunk);
        let mut envelopes = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].to_string();
            self.buffer = self.buffer[newline_pos + 1..].to_string();

            if let Some(envelope) = self.parse_line(&line) {
                envelopes.push(envelope);
            }
        }

        envelopes
    }

    /// Reset the parser state.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
