// ABOUTME: Handle on the local SSH agent used by a session.
// ABOUTME: Yields signers, authenticates dials, and arranges agent forwarding.

use super::backend::{Agent, Backend, ExecChannel, Transport};
use super::error::{Error, Result};
use crate::types::ConnectionTarget;
use russh::keys::ssh_key::PublicKey;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// An open agent connection plus the forwarding state tied to it.
pub struct AgentHandle<A> {
    socket_path: PathBuf,
    /// `None` once closed.
    client: Mutex<Option<A>>,
    forwarding: AtomicBool,
}

impl<A> std::fmt::Debug for AgentHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("socket_path", &self.socket_path)
            .field("forwarding", &self.forwarding.load(Ordering::SeqCst))
            .finish()
    }
}

impl<A: Agent> AgentHandle<A> {
    /// Connect to the agent listening at `socket_path`.
    pub async fn open<B>(backend: &B, socket_path: impl Into<PathBuf>) -> Result<Self>
    where
        B: Backend<Agent = A>,
    {
        let socket_path = socket_path.into();
        let client = backend.open_agent(&socket_path).await?;
        Ok(Self {
            socket_path,
            client: Mutex::new(Some(client)),
            forwarding: AtomicBool::new(false),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether per-command forwarding requests will be issued.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding.load(Ordering::SeqCst)
    }

    /// Keys the agent can sign with.
    pub async fn signers(&self) -> Result<Vec<PublicKey>> {
        let mut client = self.client.lock().await;
        client.as_mut().ok_or_else(closed)?.identities().await
    }

    /// Dial `target`, letting the backend sign authentication requests through this agent.
    pub async fn dial<B>(
        &self,
        backend: &B,
        target: &ConnectionTarget,
        signers: &[PublicKey],
    ) -> Result<B::Transport>
    where
        B: Backend<Agent = A>,
    {
        let mut client = self.client.lock().await;
        let client = client.as_mut().ok_or_else(closed)?;
        backend.dial(target, signers, client).await
    }

    /// Make this agent the target for agent channels the server opens on `transport`.
    pub async fn enable_forwarding<T: Transport>(&self, transport: &T) -> Result<()> {
        transport
            .forward_to_agent(&self.socket_path)
            .await
            .map_err(|e| match e {
                Error::ForwardSetup(_) => e,
                other => Error::ForwardSetup(other.to_string()),
            })?;
        self.forwarding.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Ask the server to forward the agent for one channel.
    ///
    /// Does nothing unless [`enable_forwarding`](Self::enable_forwarding) succeeded.
    pub async fn request_forwarding<C: ExecChannel>(&self, channel: &mut C) -> Result<()> {
        if !self.is_forwarding() {
            return Ok(());
        }
        channel
            .request_agent_forwarding()
            .await
            .map_err(|e| match e {
                Error::ForwardRequest(_) => e,
                other => Error::ForwardRequest(other.to_string()),
            })
    }

    /// Release the agent connection. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let client = self.client.lock().await.take();
        match client {
            Some(mut client) => client.close().await,
            None => Ok(()),
        }
    }
}

fn closed() -> Error {
    Error::Agent("agent connection is closed".to_string())
}
