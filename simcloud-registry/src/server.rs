use crate::errors::Result;

use serde::{Deserialize, Serialize};
use simcloud_core::wire::RegistryMessage;
use simcloud_core::WorkerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default registry port, kept from the original deployment.
pub const DEFAULT_REGISTRY_PORT: u16 = 18811;

const DATAGRAM_BUF_BYTES: usize = 64 * 1024;

/// Registry service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Address the UDP socket binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// A registration lapses this long after the last keep-alive
    #[serde(default = "default_pruning_timeout_ms")]
    pub pruning_timeout_ms: u64,
    /// How often the background sweep drops lapsed registrations
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    format!("0.0.0.0:{}", DEFAULT_REGISTRY_PORT)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], DEFAULT_REGISTRY_PORT)))
}

fn default_pruning_timeout_ms() -> u64 {
    240_000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            bind_addr: default_bind_addr(),
            pruning_timeout_ms: default_pruning_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RegistrySettings {
    fn pruning_timeout(&self) -> Duration {
        Duration::from_millis(self.pruning_timeout_ms)
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// UDP registry server.
///
/// Records tag -> worker -> deadline; a `Register` from a worker extends its
/// deadline by the pruning timeout, an `Unregister` removes it immediately,
/// and `Discover` answers with the non-lapsed workers for the tag.
pub struct RegistryServer {
    settings: RegistrySettings,
    socket: UdpSocket,
    entries: Arc<Mutex<HashMap<String, HashMap<WorkerId, Instant>>>>,
    shutdown: watch::Sender<bool>,
}

/// Shutdown handle for a served registry, grabbed before `serve` consumes
/// the server.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    shutdown: watch::Sender<bool>,
}

impl RegistryHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl RegistryServer {
    pub async fn bind(settings: RegistrySettings) -> Result<Self> {
        let socket = UdpSocket::bind(settings.bind_addr).await?;
        info!(addr = %socket.local_addr()?, "registry server listening");
        let (shutdown, _) = watch::channel(false);
        Ok(RegistryServer {
            settings,
            socket,
            entries: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        })
    }

    /// Actual bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serve datagrams until shut down or the socket fails.
    pub async fn serve(self) -> Result<()> {
        let mut buf = vec![0u8; DATAGRAM_BUF_BYTES];
        let mut sweep = tokio::time::interval(self.settings.sweep_interval());
        let mut shutdown = self.shutdown.subscribe();
        // A shutdown signaled before we subscribed is only visible in the
        // current value, not as a change.
        if *shutdown.borrow() {
            info!("registry server shutting down");
            return Ok(());
        }
        // The first tick fires immediately; harmless on an empty table.
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, src) = received?;
                    match serde_json::from_slice::<RegistryMessage>(&buf[..len]) {
                        Ok(message) => self.process(message, src).await?,
                        Err(e) => warn!(src = %src, error = %e, "dropping undecodable registry datagram"),
                    }
                }
                _ = sweep.tick() => {
                    self.prune_all().await;
                }
                _ = shutdown.changed() => {
                    info!("registry server shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn process(&self, message: RegistryMessage, src: SocketAddr) -> Result<()> {
        match message {
            RegistryMessage::Register { tag, port } => {
                let worker = WorkerId::new(src.ip().to_string(), port);
                let deadline = Instant::now() + self.settings.pruning_timeout();
                let mut entries = self.entries.lock().await;
                let known = entries
                    .entry(tag.clone())
                    .or_default()
                    .insert(worker.clone(), deadline)
                    .is_some();
                if !known {
                    info!(tag = %tag, worker = %worker, "worker registered");
                } else {
                    debug!(tag = %tag, worker = %worker, "worker keep-alive");
                }
            }
            RegistryMessage::Unregister { tag, port } => {
                let worker = WorkerId::new(src.ip().to_string(), port);
                let mut entries = self.entries.lock().await;
                if let Some(workers) = entries.get_mut(&tag) {
                    if workers.remove(&worker).is_some() {
                        info!(tag = %tag, worker = %worker, "worker unregistered");
                    }
                }
            }
            RegistryMessage::Discover { tag } => {
                let now = Instant::now();
                let workers: Vec<WorkerId> = {
                    let mut entries = self.entries.lock().await;
                    match entries.get_mut(&tag) {
                        Some(workers) => {
                            workers.retain(|_, deadline| *deadline > now);
                            workers.keys().cloned().collect()
                        }
                        None => Vec::new(),
                    }
                };
                debug!(tag = %tag, src = %src, count = workers.len(), "discover request");
                let reply = serde_json::to_vec(&RegistryMessage::Workers { workers })?;
                self.socket.send_to(&reply, src).await?;
            }
            RegistryMessage::Workers { .. } => {
                warn!(src = %src, "unexpected Workers datagram on the server side");
            }
        }
        Ok(())
    }

    async fn prune_all(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        for (tag, workers) in entries.iter_mut() {
            let before = workers.len();
            workers.retain(|worker, deadline| {
                let live = *deadline > now;
                if !live {
                    info!(tag = %tag, worker = %worker, "pruning lapsed worker registration");
                }
                live
            });
            if workers.len() != before {
                debug!(tag = %tag, remaining = workers.len(), "sweep pruned registrations");
            }
        }
        entries.retain(|_, workers| !workers.is_empty());
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
