// ABOUTME: Application-wide error types for agentssh.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("no agent socket configured and SSH_AUTH_SOCK is not set")]
    MissingAgentSocket,

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Process exit code for failures other than a remote non-zero exit.
pub const FAILURE_EXIT_CODE: i32 = 255;

impl Error {
    /// Remote exit code when the error is a command that exited non-zero.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Error::Ssh(e) => e.exit_code(),
            _ => None,
        }
    }

    /// Exit code for the CLI process.
    ///
    /// Remote codes above 255 are clamped so they can't wrap around to 0.
    pub fn process_exit_code(&self) -> i32 {
        match self.exit_code() {
            Some(code) => code.min(255) as i32,
            None => FAILURE_EXIT_CODE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
