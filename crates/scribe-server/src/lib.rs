//! Scribe server library - HTTP ingestion gateway and capture supervisor.
//!
//! Separated from main.rs so the router and state can be exercised by
//! integration tests.

pub mod config;
pub mod forwarder;
pub mod gateway;
pub mod logging;
pub mod routes;
pub mod state;
