// ABOUTME: SSH-specific error types.
// ABOUTME: Separates dial-time failures from per-command failures.

use crate::types::ParseError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to connect to SSH agent at {path}: {source}")]
    AgentConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH agent error: {0}")]
    Agent(String),

    #[error("connection failed: {0}")]
    Dial(String),

    #[error("connection timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("authentication failed: no agent key was accepted")]
    AuthenticationFailed,

    #[error("agent forwarding setup failed: {0}")]
    ForwardSetup(String),

    #[error("failed to open channel: {0}")]
    Channel(String),

    #[error("agent forwarding request failed: {0}")]
    ForwardRequest(String),

    #[error("failed to set environment variable {key}: {reason}")]
    EnvSet { key: String, reason: String },

    #[error("command could not be started: {0}")]
    CommandStart(String),

    #[error("command exited with status {code}")]
    CommandExited { code: u32 },

    #[error("command terminated by signal {signal}")]
    CommandSignaled { signal: String },

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("session is closed")]
    SessionClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which half of the session lifecycle an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Address parsing, agent access, transport setup, forwarding setup.
    Dial,
    /// Anything after a session exists.
    Command,
}

impl Error {
    pub fn phase(&self) -> Phase {
        match self {
            Error::Parse(_)
            | Error::AgentConnect { .. }
            | Error::Agent(_)
            | Error::Dial(_)
            | Error::DialTimeout(_)
            | Error::AuthenticationFailed
            | Error::ForwardSetup(_) => Phase::Dial,
            _ => Phase::Command,
        }
    }

    /// True when the command was handed to the remote side but did not
    /// finish successfully.
    pub fn is_exec_failure(&self) -> bool {
        matches!(
            self,
            Error::CommandStart(_)
                | Error::CommandExited { .. }
                | Error::CommandSignaled { .. }
                | Error::ChannelClosed
        )
    }

    /// Remote exit code, if the command ran and exited non-zero.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Error::CommandExited { code } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
