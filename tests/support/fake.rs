// ABOUTME: In-memory Backend, Transport, ExecChannel, and Agent fakes.
// ABOUTME: Every call is appended to a shared event log for assertions.

use agentssh::ssh::{
    Agent, Backend, Error, ExecChannel, ExitStatus, Input, OutputSink, Result, Transport,
};
use agentssh::types::ConnectionTarget;
use async_trait::async_trait;
use parking_lot::Mutex;
use russh::keys::ssh_key::PublicKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;

pub const AGENT_SOCKET: &str = "/run/test-agent.sock";

const TEST_KEYS: [&str; 2] = [
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEB fake-0",
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgIC fake-1",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AgentOpen(PathBuf),
    AgentIdentities,
    AgentClose,
    Dial { target: String, signers: usize },
    ForwardToAgent(PathBuf),
    TransportClose,
    ChannelOpen(usize),
    RequestForwarding(usize),
    SetEnv(usize, String, String),
    Exec(usize, String),
    ChannelClose(usize),
}

/// One piece of output produced by a fake command.
#[derive(Debug, Clone)]
pub enum Chunk {
    Stdout(&'static [u8]),
    Stderr(&'static [u8]),
}

/// Failure switches and canned command behavior.
#[derive(Debug, Clone)]
pub struct Script {
    pub agent_open_fails: bool,
    pub identities_fail: bool,
    pub agent_close_fails: bool,
    pub dial_fails: bool,
    pub dial_hangs: bool,
    pub forward_setup_fails: bool,
    pub channel_open_fails: bool,
    pub forward_request_fails: bool,
    pub env_fails_on: Option<String>,
    pub exec_refused: bool,
    /// Copy stdin to stdout before emitting `output`.
    pub echo_stdin: bool,
    pub output: Vec<Chunk>,
    /// `None` simulates a channel that dies before reporting a status.
    pub status: Option<ExitStatus>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            agent_open_fails: false,
            identities_fail: false,
            agent_close_fails: false,
            dial_fails: false,
            dial_hangs: false,
            forward_setup_fails: false,
            channel_open_fails: false,
            forward_request_fails: false,
            env_fails_on: None,
            exec_refused: false,
            echo_stdin: false,
            output: Vec::new(),
            status: Some(ExitStatus::Code(0)),
        }
    }
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.0.lock().contains(event)
    }
}

pub struct FakeBackend {
    pub log: EventLog,
    script: Arc<Script>,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self {
            log: EventLog::default(),
            script: Arc::new(script),
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(Script::default())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    type Agent = FakeAgent;
    type Transport = FakeTransport;

    async fn open_agent(&self, socket: &Path) -> Result<FakeAgent> {
        self.log.push(Event::AgentOpen(socket.to_path_buf()));
        if self.script.agent_open_fails {
            return Err(Error::AgentConnect {
                path: socket.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(FakeAgent {
            log: self.log.clone(),
            script: Arc::clone(&self.script),
        })
    }

    async fn dial(
        &self,
        target: &ConnectionTarget,
        signers: &[PublicKey],
        _agent: &mut FakeAgent,
    ) -> Result<FakeTransport> {
        self.log.push(Event::Dial {
            target: target.to_string(),
            signers: signers.len(),
        });
        if self.script.dial_hangs {
            std::future::pending::<()>().await;
        }
        if self.script.dial_fails {
            return Err(Error::AuthenticationFailed);
        }
        Ok(FakeTransport {
            log: self.log.clone(),
            script: Arc::clone(&self.script),
            next_channel: AtomicUsize::new(0),
        })
    }
}

pub struct FakeAgent {
    log: EventLog,
    script: Arc<Script>,
}

#[async_trait]
impl Agent for FakeAgent {
    async fn identities(&mut self) -> Result<Vec<PublicKey>> {
        self.log.push(Event::AgentIdentities);
        if self.script.identities_fail {
            return Err(Error::Agent("agent refused request".to_string()));
        }
        TEST_KEYS
            .iter()
            .map(|key| PublicKey::from_openssh(key).map_err(|e| Error::Agent(e.to_string())))
            .collect()
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(Event::AgentClose);
        if self.script.agent_close_fails {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        Ok(())
    }
}

pub struct FakeTransport {
    log: EventLog,
    script: Arc<Script>,
    next_channel: AtomicUsize,
}

#[async_trait]
impl Transport for FakeTransport {
    type Channel = FakeChannel;

    async fn open_channel(&self) -> Result<FakeChannel> {
        let id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        if self.script.channel_open_fails {
            return Err(Error::Channel("administratively prohibited".to_string()));
        }
        self.log.push(Event::ChannelOpen(id));
        Ok(FakeChannel {
            id,
            log: self.log.clone(),
            script: Arc::clone(&self.script),
        })
    }

    async fn forward_to_agent(&self, socket: &Path) -> Result<()> {
        self.log.push(Event::ForwardToAgent(socket.to_path_buf()));
        if self.script.forward_setup_fails {
            return Err(Error::ForwardSetup("already registered".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push(Event::TransportClose);
        Ok(())
    }
}

pub struct FakeChannel {
    pub id: usize,
    log: EventLog,
    script: Arc<Script>,
}

#[async_trait]
impl ExecChannel for FakeChannel {
    async fn request_agent_forwarding(&mut self) -> Result<()> {
        self.log.push(Event::RequestForwarding(self.id));
        if self.script.forward_request_fails {
            return Err(Error::ForwardRequest("request denied by server".to_string()));
        }
        Ok(())
    }

    async fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        self.log
            .push(Event::SetEnv(self.id, key.to_string(), value.to_string()));
        if self.script.env_fails_on.as_deref() == Some(key) {
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
        self.log.push(Event::Exec(self.id, command.to_string()));
        if self.script.exec_refused {
            return Err(Error::CommandStart(
                "server refused to run the command".to_string(),
            ));
        }

        if self.script.echo_stdin {
            if let Some(reader) = stdin {
                let mut input = Vec::new();
                reader.read_to_end(&mut input).await?;
                sink.write_stdout(&input).await?;
            }
        }

        for chunk in &self.script.output {
            match chunk {
                Chunk::Stdout(data) => sink.write_stdout(data).await?,
                Chunk::Stderr(data) => sink.write_stderr(data).await?,
            }
        }
        sink.flush().await?;

        self.script.status.clone().ok_or(Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(Event::ChannelClose(self.id));
        Ok(())
    }
}
