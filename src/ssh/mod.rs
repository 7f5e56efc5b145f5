// ABOUTME: SSH client module for running remote commands with agent-held keys.
// ABOUTME: Supports agent forwarding and known_hosts verification.

mod agent;
mod backend;
mod client;
mod error;
mod forward;
mod session;

pub use agent::AgentHandle;
pub use backend::{
    Agent, Backend, ExecChannel, ExitStatus, Input, Output, OutputSink, Transport,
};
pub use client::{RusshAgent, RusshBackend, RusshChannel, RusshTransport};
pub use error::{Error, Phase, Result};
pub use session::{DialConfig, Session};
