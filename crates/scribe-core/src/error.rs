//! Error types for Scribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already active: {0}")]
    SessionAlreadyActive(String),

    #[error("Process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Transcript error: {0}")]
    TranscriptError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
