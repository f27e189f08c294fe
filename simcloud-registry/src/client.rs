use crate::errors::{RegistryError, Result};

use async_trait::async_trait;
use simcloud_core::wire::RegistryMessage;
use simcloud_core::{Discovery, DiscoveryError, WorkerId};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

const REPLY_BUF_BYTES: usize = 64 * 1024;

/// Client side of the registry protocol.
///
/// Used by workers to advertise themselves and by the dispatcher as its
/// `Discovery` collaborator.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    registry_addr: SocketAddr,
    reply_timeout: Duration,
}

impl RegistryClient {
    pub fn new(registry_addr: SocketAddr) -> Self {
        RegistryClient {
            registry_addr,
            reply_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Advertise a worker's job service port under `tag`. Repeated on a
    /// keep-alive interval by the worker; the registry prunes silent entries.
    pub async fn register(&self, tag: &str, port: u16) -> Result<()> {
        self.send(&RegistryMessage::Register {
            tag: tag.to_string(),
            port,
        })
        .await?;
        Ok(())
    }

    /// Withdraw an advertisement immediately.
    pub async fn unregister(&self, tag: &str, port: u16) -> Result<()> {
        self.send(&RegistryMessage::Unregister {
            tag: tag.to_string(),
            port,
        })
        .await?;
        Ok(())
    }

    /// Query the registry for the workers currently advertising `tag`.
    pub async fn discover_workers(&self, tag: &str) -> Result<Vec<WorkerId>> {
        let socket = self
            .send(&RegistryMessage::Discover {
                tag: tag.to_string(),
            })
            .await?;

        let mut buf = vec![0u8; REPLY_BUF_BYTES];
        let len = match timeout(self.reply_timeout, socket.recv(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => return Err(RegistryError::ReplyTimeout),
        };

        match serde_json::from_slice::<RegistryMessage>(&buf[..len])? {
            RegistryMessage::Workers { workers } => {
                debug!(tag = %tag, count = workers.len(), "registry answered discover");
                Ok(workers)
            }
            _ => Err(RegistryError::UnexpectedReply),
        }
    }

    async fn send(&self, message: &RegistryMessage) -> Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.registry_addr).await?;
        socket.send(&serde_json::to_vec(message)?).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Discovery for RegistryClient {
    async fn discover(&self, tag: &str) -> std::result::Result<Vec<WorkerId>, DiscoveryError> {
        match self.discover_workers(tag).await {
            Ok(workers) if workers.is_empty() => Err(DiscoveryError::NotFound(tag.to_string())),
            Ok(workers) => Ok(workers),
            Err(e) => Err(DiscoveryError::Unreachable(e.to_string())),
        }
    }
}
