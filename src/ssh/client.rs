// ABOUTME: russh-backed transport and agent collaborators.
// ABOUTME: Handles connection, agent authentication, host keys, and channel I/O.

use super::backend::{Agent, Backend, ExecChannel, ExitStatus, Input, OutputSink, Transport};
use super::error::{Error, Result};
use super::forward::{self, AgentForward};
use crate::types::ConnectionTarget;
use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key::{self, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
    agent_forward: Arc<AgentForward>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(
                    "Host key for {}:{} does not match known_hosts",
                    self.host,
                    self.port
                );
                Ok(false)
            }
            // Unreadable known_hosts is treated like an unknown host.
            Err(_) => Ok(self.trust_on_first_use),
        }
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        match self.agent_forward.socket() {
            Some(socket) => forward::spawn_relay(channel, socket.to_path_buf()),
            None => {
                tracing::warn!(
                    "{}:{} opened an agent channel but forwarding is not enabled",
                    self.host,
                    self.port
                );
                forward::spawn_reject(channel);
            }
        }
        Ok(())
    }
}

/// Transport and agent collaborators backed by russh and a Unix-socket agent.
#[derive(Debug, Clone)]
pub struct RusshBackend {
    /// Accept and record host keys that are not yet in known_hosts.
    trust_on_first_use: bool,
    /// known_hosts file; `None` uses ~/.ssh/known_hosts.
    known_hosts_path: Option<PathBuf>,
    keepalive_interval: Option<Duration>,
}

impl Default for RusshBackend {
    fn default() -> Self {
        Self {
            trust_on_first_use: true,
            known_hosts_path: None,
            keepalive_interval: Some(Duration::from_secs(15)),
        }
    }
}

impl RusshBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Try each agent identity in turn until the server accepts one.
    async fn authenticate(
        session: &mut Handle<SshHandler>,
        user: &str,
        signers: &[PublicKey],
        agent: &mut AgentClient<UnixStream>,
    ) -> Result<bool> {
        for key in signers {
            let hash_alg = if matches!(key.algorithm(), ssh_key::Algorithm::Rsa { .. }) {
                session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Protocol)?
                    .flatten()
            } else {
                None
            };

            match session
                .authenticate_publickey_with(user, key.clone(), hash_alg, agent)
                .await
            {
                Ok(result) if result.success() => return Ok(true),
                Ok(_) => {
                    tracing::debug!(
                        "Server rejected agent key {}",
                        key.fingerprint(Default::default())
                    );
                }
                Err(e) => {
                    tracing::debug!("Agent signing failed: {:?}", e);
                }
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Backend for RusshBackend {
    type Agent = RusshAgent;
    type Transport = RusshTransport;

    async fn open_agent(&self, socket: &Path) -> Result<RusshAgent> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|source| Error::AgentConnect {
                path: socket.to_path_buf(),
                source,
            })?;
        Ok(RusshAgent {
            client: Some(AgentClient::connect(stream)),
        })
    }

    async fn dial(
        &self,
        target: &ConnectionTarget,
        signers: &[PublicKey],
        agent: &mut RusshAgent,
    ) -> Result<RusshTransport> {
        if signers.is_empty() {
            return Err(Error::Agent("no keys in SSH agent".to_string()));
        }
        let agent = agent.client_mut()?;

        let russh_config = Config {
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        };

        let agent_forward = Arc::new(AgentForward::default());
        let handler = SshHandler {
            host: target.host().to_string(),
            port: target.port(),
            trust_on_first_use: self.trust_on_first_use,
            known_hosts_path: self.known_hosts_path.clone(),
            agent_forward: Arc::clone(&agent_forward),
        };

        let mut session = client::connect(
            Arc::new(russh_config),
            (target.host(), target.port()),
            handler,
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("Connection refused") {
                Error::Dial(format!(
                    "connection refused to {}:{}",
                    target.host(),
                    target.port()
                ))
            } else {
                Error::Dial(e.to_string())
            }
        })?;

        let authenticated =
            match Self::authenticate(&mut session, target.user(), signers, agent).await {
                Ok(authenticated) => authenticated,
                Err(e) => {
                    let _ = session.disconnect(Disconnect::ByApplication, "", "en").await;
                    return Err(e);
                }
            };
        if !authenticated {
            let _ = session.disconnect(Disconnect::ByApplication, "", "en").await;
            return Err(Error::AuthenticationFailed);
        }

        tracing::debug!("Authenticated to {}", target);
        Ok(RusshTransport {
            handle: session,
            agent_forward,
        })
    }
}

/// Agent connection over a local Unix socket.
pub struct RusshAgent {
    client: Option<AgentClient<UnixStream>>,
}

impl RusshAgent {
    fn client_mut(&mut self) -> Result<&mut AgentClient<UnixStream>> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::Agent("agent connection is closed".to_string()))
    }
}

#[async_trait]
impl Agent for RusshAgent {
    async fn identities(&mut self) -> Result<Vec<PublicKey>> {
        self.client_mut()?
            .request_identities()
            .await
            .map_err(|e| Error::Agent(format!("failed to list agent keys: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client closes the socket.
        self.client.take();
        Ok(())
    }
}

/// An authenticated russh connection.
pub struct RusshTransport {
    handle: Handle<SshHandler>,
    agent_forward: Arc<AgentForward>,
}

#[async_trait]
impl Transport for RusshTransport {
    type Channel = RusshChannel;

    async fn open_channel(&self) -> Result<RusshChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        Ok(RusshChannel { channel })
    }

    async fn forward_to_agent(&self, socket: &Path) -> Result<()> {
        self.agent_forward.register(socket)
    }

    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}

/// A russh session channel.
pub struct RusshChannel {
    channel: Channel<Msg>,
}

impl RusshChannel {
    /// Wait for the reply to a `want_reply` channel request.
    async fn wait_reply(&mut self) -> Result<bool> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(true),
                Some(ChannelMsg::Failure) => return Ok(false),
                Some(ChannelMsg::Close) | None => return Err(Error::ChannelClosed),
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl ExecChannel for RusshChannel {
    async fn request_agent_forwarding(&mut self) -> Result<()> {
        self.channel
            .agent_forward(true)
            .await
            .map_err(|e| Error::ForwardRequest(e.to_string()))?;
        if !self.wait_reply().await? {
            return Err(Error::ForwardRequest("request denied by server".to_string()));
        }
        Ok(())
    }

    async fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        self.channel
            .set_env(true, key, value)
            .await
            .map_err(|e| Error::EnvSet {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if !self.wait_reply().await? {
            return Err(Error::EnvSet {
                key: key.to_string(),
                reason: "rejected by server".to_string(),
            });
        }
        Ok(())
    }

    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<Input<'_>>,
        mut sink: OutputSink<'_>,
    ) -> Result<ExitStatus> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandStart(e.to_string()))?;

        // Output keeps draining while stdin waits on the remote window.
        let pump = pump_stdin(stdin, self.channel.make_writer());
        tokio::pin!(pump);
        let mut pump_done = false;

        let mut exit_status = None;
        let mut got_eof = false;

        loop {
            tokio::select! {
                r = &mut pump, if !pump_done => {
                    pump_done = true;
                    if let Err(e) = r {
                        tracing::debug!("Stopped sending stdin: {}", e);
                    }
                }

                msg = self.channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => sink.write_stdout(&data).await?,
                        Some(ChannelMsg::ExtendedData { data, ext }) => {
                            // ext 1 is stderr
                            if ext == 1 {
                                sink.write_stderr(&data).await?;
                            }
                        }
                        Some(ChannelMsg::Failure) if exit_status.is_none() => {
                            return Err(Error::CommandStart(
                                "server refused to run the command".to_string(),
                            ));
                        }
                        Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                            exit_status = Some(ExitStatus::Code(code));
                            if got_eof {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitSignal {
                            signal_name,
                            core_dumped,
                            error_message,
                            ..
                        }) => {
                            exit_status = Some(ExitStatus::Signal {
                                name: format!("{:?}", signal_name),
                                core_dumped,
                                message: error_message,
                            });
                            if got_eof {
                                break;
                            }
                        }
                        Some(ChannelMsg::Eof) => {
                            got_eof = true;
                            if exit_status.is_some() {
                                break;
                            }
                        }
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        sink.flush().await?;

        // No exit status means the channel or connection died mid-run.
        exit_status.ok_or(Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close().await.map_err(Error::Protocol)
    }
}

/// Copy `stdin` into the channel, then send EOF.
///
/// Without input only the EOF is sent.
async fn pump_stdin<W>(stdin: Option<Input<'_>>, mut writer: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let copied = match stdin {
        Some(reader) => tokio::io::copy(reader, &mut writer).await,
        None => Ok(0),
    };
    writer.shutdown().await?;
    copied
}
