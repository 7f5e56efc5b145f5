// ABOUTME: Library root for agentssh - remote commands over SSH with agent keys.
// ABOUTME: The CLI binary is in main.rs.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ssh;
pub mod types;
