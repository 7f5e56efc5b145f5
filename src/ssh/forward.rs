// ABOUTME: SSH agent forwarding for russh transports.
// ABOUTME: Relays server-opened agent channels to the local agent socket.

use super::error::{Error, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Per-transport forwarding registration, shared with the client handler.
#[derive(Debug, Default)]
pub(crate) struct AgentForward {
    socket: OnceLock<PathBuf>,
}

impl AgentForward {
    /// Register the agent socket that incoming agent channels are relayed to.
    pub(crate) fn register(&self, socket: &Path) -> Result<()> {
        self.socket.set(socket.to_path_buf()).map_err(|_| {
            Error::ForwardSetup("agent forwarding is already registered for this connection".into())
        })
    }

    pub(crate) fn socket(&self) -> Option<&Path> {
        self.socket.get().map(PathBuf::as_path)
    }
}

/// Relay one agent channel in the background.
pub(crate) fn spawn_relay(channel: Channel<Msg>, socket: PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = relay(channel, &socket).await {
            tracing::debug!("Agent forward relay error: {}", e);
        }
    });
}

/// Reject an agent channel when forwarding was never set up.
pub(crate) fn spawn_reject(channel: Channel<Msg>) {
    tokio::spawn(async move {
        let _ = channel.close().await;
    });
}

/// Pump bytes between an agent channel and a fresh connection to the local agent.
async fn relay(mut channel: Channel<Msg>, socket: &Path) -> Result<()> {
    let mut local_stream = match UnixStream::connect(socket).await {
        Ok(stream) => stream,
        Err(source) => {
            let _ = channel.close().await;
            return Err(Error::AgentConnect {
                path: socket.to_path_buf(),
                source,
            });
        }
    };

    let mut stream_closed = false;
    let mut channel_eof = false;
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        tokio::select! {
            r = local_stream.read(&mut buf), if !stream_closed => {
                match r {
                    Ok(0) => {
                        stream_closed = true;
                        let _ = channel.eof().await;
                        if channel_eof {
                            break;
                        }
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            tracing::debug!("Agent channel data error: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Local agent read error: {}", e);
                        break;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        if let Err(e) = local_stream.write_all(data).await {
                            tracing::debug!("Local agent write error: {}", e);
                            break;
                        }
                    }
                    // Half-close: the agent may still owe a reply
                    Some(ChannelMsg::Eof) => {
                        channel_eof = true;
                        if let Err(e) = local_stream.shutdown().await {
                            tracing::debug!("Local agent shutdown error: {}", e);
                        }
                        if stream_closed {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    let _ = channel.close().await;
    Ok(())
}
