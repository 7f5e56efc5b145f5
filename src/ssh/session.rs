// ABOUTME: SSH session lifecycle: dial, environment, command execution, close.
// ABOUTME: Releases agent, transport, and channel handles on every failure path.

use super::agent::AgentHandle;
use super::backend::{
    Agent, Backend, ExecChannel, ExitStatus, Input, Output, OutputSink, Transport,
};
use super::client::RusshBackend;
use super::error::{Error, Result};
use crate::types::ConnectionTarget;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Parameters for establishing a session.
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Remote host, port, and user.
    pub target: ConnectionTarget,
    /// Path of the local agent's Unix socket.
    pub agent_socket: PathBuf,
    /// Relay the local agent to commands run on the remote host.
    pub forward_agent: bool,
    /// Upper bound on connecting and authenticating.
    pub timeout: Duration,
}

impl DialConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(target: ConnectionTarget, agent_socket: impl Into<PathBuf>) -> Self {
        Self {
            target,
            agent_socket: agent_socket.into(),
            forward_agent: false,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn forward_agent(mut self, forward: bool) -> Self {
        self.forward_agent = forward;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An authenticated connection that runs remote commands.
///
/// Each command gets its own channel, so `output`, `combined_output`, and
/// `run` may be awaited concurrently from several tasks.
pub struct Session<B: Backend = RusshBackend> {
    target: ConnectionTarget,
    transport: B::Transport,
    agent: AgentHandle<B::Agent>,
    envs: HashMap<String, String>,
    closed: AtomicBool,
}

impl<B: Backend> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("agent", &self.agent)
            .field("envs", &self.envs.keys().collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session<RusshBackend> {
    /// Connect to `addr` (`[user@]host[:port]`) using keys from the agent at
    /// `agent_socket`, with default host key handling and timeout.
    pub async fn dial(
        addr: &str,
        agent_socket: impl Into<PathBuf>,
        forward_agent: bool,
    ) -> Result<Self> {
        let target = ConnectionTarget::parse(addr)?;
        let config = DialConfig::new(target, agent_socket).forward_agent(forward_agent);
        Self::dial_with(&RusshBackend::default(), config).await
    }
}

impl<B: Backend> Session<B> {
    /// Connect through `backend`.
    ///
    /// Either every resource ends up owned by the returned session, or the
    /// error is returned with everything opened along the way already released.
    pub async fn dial_with(backend: &B, config: DialConfig) -> Result<Self> {
        tracing::debug!("Opening SSH agent at {}", config.agent_socket.display());
        let agent = AgentHandle::open(backend, &config.agent_socket).await?;

        let transport = match Self::connect(backend, &agent, &config).await {
            Ok(transport) => transport,
            Err(e) => {
                release_agent(&agent).await;
                return Err(e);
            }
        };

        if config.forward_agent {
            if let Err(e) = agent.enable_forwarding(&transport).await {
                release_transport(&transport).await;
                release_agent(&agent).await;
                return Err(e);
            }
            tracing::debug!("Agent forwarding enabled for {}", config.target);
        }

        Ok(Self {
            target: config.target,
            transport,
            agent,
            envs: HashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn connect(
        backend: &B,
        agent: &AgentHandle<B::Agent>,
        config: &DialConfig,
    ) -> Result<B::Transport> {
        let signers = agent.signers().await?;
        tracing::debug!("SSH agent offered {} key(s)", signers.len());

        tracing::debug!("Connecting to {}", config.target);
        match tokio::time::timeout(
            config.timeout,
            agent.dial(backend, &config.target, &signers),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::DialTimeout(config.timeout)),
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn forwards_agent(&self) -> bool {
        self.agent.is_forwarding()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Replace the environment applied to every later command.
    ///
    /// The whole map is re-sent on each execution, so changes between calls
    /// take effect on the next one.
    pub fn set_envs(&mut self, envs: HashMap<String, String>) {
        self.envs = envs;
    }

    pub fn envs(&self) -> &HashMap<String, String> {
        &self.envs
    }

    /// Run `command` and return its stdout.
    ///
    /// A non-zero exit is an error; output produced before it is dropped.
    pub async fn output(&self, command: &str, stdin: Option<Input<'_>>) -> Result<Vec<u8>> {
        let mut stdout = Vec::new();
        let mut stderr = tokio::io::sink();
        let sink = OutputSink::Split {
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        check_exit(self.execute(command, stdin, sink).await?)?;
        Ok(stdout)
    }

    /// Run `command` and return stdout and stderr interleaved as they arrived.
    pub async fn combined_output(
        &self,
        command: &str,
        stdin: Option<Input<'_>>,
    ) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let sink = OutputSink::Combined(&mut output);
        check_exit(self.execute(command, stdin, sink).await?)?;
        Ok(output)
    }

    /// Run `command`, streaming its output into the given writers.
    pub async fn run(
        &self,
        command: &str,
        stdin: Option<Input<'_>>,
        stdout: Output<'_>,
        stderr: Output<'_>,
    ) -> Result<()> {
        let sink = OutputSink::Split { stdout, stderr };
        check_exit(self.execute(command, stdin, sink).await?)
    }

    /// Open a channel, run the command on it, and close it whatever happened.
    async fn execute(
        &self,
        command: &str,
        stdin: Option<Input<'_>>,
        sink: OutputSink<'_>,
    ) -> Result<ExitStatus> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let mut channel = self
            .transport
            .open_channel()
            .await
            .map_err(|e| match e {
                Error::Channel(_) => e,
                other => Error::Channel(other.to_string()),
            })?;

        let result = self.drive(&mut channel, command, stdin, sink).await;

        if let Err(e) = channel.close().await {
            tracing::debug!("Failed to close channel: {}", e);
        }
        result
    }

    async fn drive(
        &self,
        channel: &mut <B::Transport as Transport>::Channel,
        command: &str,
        stdin: Option<Input<'_>>,
        sink: OutputSink<'_>,
    ) -> Result<ExitStatus> {
        self.agent.request_forwarding(channel).await?;

        for (key, value) in &self.envs {
            channel.set_env(key, value).await.map_err(|e| match e {
                Error::EnvSet { .. } => e,
                other => Error::EnvSet {
                    key: key.clone(),
                    reason: other.to_string(),
                },
            })?;
        }

        tracing::debug!("Executing on {}: {}", self.target, command);
        channel.exec(command, stdin, sink).await
    }

    /// Close the agent connection and the transport.
    ///
    /// Both are attempted even if the first fails. Calling this again is a
    /// no-op, and commands issued afterwards fail with [`Error::SessionClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let agent_result = self.agent.close().await;
        let transport_result = self.transport.close().await;
        agent_result.and(transport_result)
    }
}

fn check_exit(status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    match status {
        ExitStatus::Code(code) => Err(Error::CommandExited { code }),
        ExitStatus::Signal { name, .. } => Err(Error::CommandSignaled { signal: name }),
    }
}

async fn release_agent<A: Agent>(agent: &AgentHandle<A>) {
    if let Err(e) = agent.close().await {
        tracing::warn!("Failed to release SSH agent connection: {}", e);
    }
}

async fn release_transport<T: Transport>(transport: &T) {
    if let Err(e) = transport.close().await {
        tracing::warn!("Failed to close SSH connection: {}", e);
    }
}
