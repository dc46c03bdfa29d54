//! Shared types for the Scribe capture-and-ingest pipeline.

mod capture;
mod entities;
mod hooks;
mod protocol;

pub use capture::*;
pub use entities::*;
pub use hooks::*;
pub use protocol::*;
