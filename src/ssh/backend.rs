// ABOUTME: Capability traits for the SSH transport and the local agent.
// ABOUTME: The russh implementation lives in client.rs; tests plug in fakes.

use super::error::Result;
use crate::types::ConnectionTarget;
use async_trait::async_trait;
use russh::keys::ssh_key::PublicKey;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Caller-supplied input bound to a remote command's stdin.
pub type Input<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Caller-supplied destination for remote output.
pub type Output<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Where a running command's output goes.
pub enum OutputSink<'a> {
    /// stdout and stderr to separate writers.
    Split {
        stdout: Output<'a>,
        stderr: Output<'a>,
    },
    /// Both streams interleaved into one writer in arrival order.
    Combined(Output<'a>),
}

impl OutputSink<'_> {
    pub async fn write_stdout(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            OutputSink::Split { stdout, .. } => stdout.write_all(data).await,
            OutputSink::Combined(out) => out.write_all(data).await,
        }
    }

    pub async fn write_stderr(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            OutputSink::Split { stderr, .. } => stderr.write_all(data).await,
            OutputSink::Combined(out) => out.write_all(data).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputSink::Split { stdout, stderr } => {
                stdout.flush().await?;
                stderr.flush().await
            }
            OutputSink::Combined(out) => out.flush().await,
        }
    }
}

/// How a remote command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Code(u32),
    Signal {
        name: String,
        core_dumped: bool,
        message: String,
    },
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

/// An open connection to a local credential agent.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Public halves of the keys the agent can sign with.
    async fn identities(&mut self) -> Result<Vec<PublicKey>>;

    /// Release the agent connection.
    async fn close(&mut self) -> Result<()>;
}

/// One authenticated connection able to carry many command channels.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Channel: ExecChannel;

    /// Open a new session channel. Safe to call concurrently.
    async fn open_channel(&self) -> Result<Self::Channel>;

    /// Serve agent channels opened by the server from the agent at `socket`.
    ///
    /// Registration happens once per transport.
    async fn forward_to_agent(&self, socket: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A session channel scoped to one remote command.
#[async_trait]
pub trait ExecChannel: Send {
    /// Ask the server to relay agent traffic for this channel.
    async fn request_agent_forwarding(&mut self) -> Result<()>;

    async fn set_env(&mut self, key: &str, value: &str) -> Result<()>;

    /// Run `command` verbatim and pump stdin/stdout/stderr until it finishes.
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<Input<'_>>,
        sink: OutputSink<'_>,
    ) -> Result<ExitStatus>;

    async fn close(&mut self) -> Result<()>;
}

/// Factory for the two external collaborators.
#[async_trait]
pub trait Backend: Send + Sync {
    type Agent: Agent;
    type Transport: Transport;

    /// Connect to the agent listening on a local socket.
    async fn open_agent(&self, socket: &Path) -> Result<Self::Agent>;

    /// Connect to `target` and authenticate as its user with agent-held keys.
    async fn dial(
        &self,
        target: &ConnectionTarget,
        signers: &[PublicKey],
        agent: &mut Self::Agent,
    ) -> Result<Self::Transport>;
}
