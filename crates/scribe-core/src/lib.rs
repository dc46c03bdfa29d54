//! Capture pipeline and persistence for Scribe.

mod assembler;
mod correlator;
mod error;
mod parser;
mod restart;
mod store;
mod supervisor;
mod transcript;

pub use assembler::{
    derive_title, title_from_prompt, SessionAssembler, TITLE_MAX_LEN, TITLE_MIN_PROMPT_LEN,
};
pub use correlator::{CorrelatorReport, ToolCallCorrelator};
pub use error::ScribeError;
pub use parser::ProtocolParser;
pub use restart::{RestartDecision, RestartPolicy, RestartTracker};
pub use store::IngestStore;
pub use supervisor::{ProcessSupervisor, SpawnOptions, SupervisorEvent};
pub use transcript::{read_transcript, write_transcript, TranscriptEntry};

/// Result type for Scribe operations.
pub type Result<T> = std::result::Result<T, ScribeError>;
