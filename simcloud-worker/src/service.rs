use crate::errors::Result;
use crate::runner::JobRunner;

use serde::{Deserialize, Serialize};
use simcloud_core::wire::{read_frame, write_frame, JobRequest, JobResponse};
use simcloud_registry::RegistryClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default worker service port, kept from the original deployment.
pub const DEFAULT_SERVICE_PORT: u16 = 18861;

/// Worker service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Address the job service binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Tag advertised to the registry
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Registry to self-register with; no registration when unset
    #[serde(default)]
    pub registry_addr: Option<SocketAddr>,
    /// Keep-alive re-registration interval
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVICE_PORT))
}

fn default_tag() -> String {
    "cloudsim".to_string()
}

fn default_keepalive_ms() -> u64 {
    60_000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            bind_addr: default_bind_addr(),
            tag: default_tag(),
            registry_addr: None,
            keepalive_ms: default_keepalive_ms(),
        }
    }
}

/// TCP job service: one connection carries exactly one job.
///
/// The listener loop never dies on a bad peer; decode and runner failures
/// are answered (or logged) per connection.
pub struct WorkerService {
    settings: WorkerSettings,
    listener: TcpListener,
    runner: Arc<dyn JobRunner>,
    shutdown: watch::Sender<bool>,
}

/// Shutdown handle for a served worker, grabbed before `serve` consumes the
/// service.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl WorkerService {
    pub async fn bind(settings: WorkerSettings, runner: Arc<dyn JobRunner>) -> Result<Self> {
        let listener = TcpListener::bind(settings.bind_addr).await?;
        info!(addr = %listener.local_addr()?, tag = %settings.tag, "worker service listening");
        let (shutdown, _) = watch::channel(false);
        Ok(WorkerService {
            settings,
            listener,
            runner,
            shutdown,
        })
    }

    /// Actual bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accept and serve jobs until shut down or the listener fails.
    ///
    /// When a registry is configured, a keep-alive task re-registers the
    /// service port on every interval while serving; a clean shutdown sends
    /// an explicit unregister, and a crashed worker simply lapses from the
    /// registry after the pruning timeout.
    pub async fn serve(self) -> Result<()> {
        let registration = match self.settings.registry_addr {
            Some(registry_addr) => Some(spawn_registration(
                registry_addr,
                self.settings.tag.clone(),
                self.local_addr()?.port(),
                Duration::from_millis(self.settings.keepalive_ms.max(1)),
            )),
            None => None,
        };

        let mut shutdown = self.shutdown.subscribe();
        let served: Result<()> = async {
            // A shutdown signaled before we subscribed is only visible in
            // the current value, not as a change.
            if *shutdown.borrow() {
                info!("worker service shutting down");
                return Ok(());
            }
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => {
                        let (stream, peer) = accepted?;
                        let runner = Arc::clone(&self.runner);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, runner).await {
                                warn!(peer = %peer, error = %e, "job connection failed");
                            }
                        });
                    }
                    _ = shutdown.changed() => {
                        info!("worker service shutting down");
                        return Ok(());
                    }
                }
            }
        }
        .await;

        if let Some(registration) = registration {
            registration.abort();
        }
        if let Some(registry_addr) = self.settings.registry_addr {
            let client = RegistryClient::new(registry_addr);
            let port = self.local_addr()?.port();
            if let Err(e) = client.unregister(&self.settings.tag, port).await {
                warn!(registry = %registry_addr, error = %e, "unregister on shutdown failed");
            }
        }
        served
    }
}

fn spawn_registration(
    registry_addr: SocketAddr,
    tag: String,
    port: u16,
    keepalive: Duration,
) -> JoinHandle<()> {
    let client = RegistryClient::new(registry_addr);
    tokio::spawn(async move {
        loop {
            if let Err(e) = client.register(&tag, port).await {
                warn!(registry = %registry_addr, error = %e, "registration keep-alive failed");
            }
            tokio::time::sleep(keepalive).await;
        }
    })
}

async fn handle_connection(mut stream: TcpStream, runner: Arc<dyn JobRunner>) -> Result<()> {
    let request: JobRequest = read_frame(&mut stream).await?;
    info!("processing job request");

    let response = match runner.run(request.job).await {
        Ok(result) => {
            info!("job request processed");
            JobResponse::Completed(result)
        }
        Err(e) => {
            error!(error = %e, "job execution failed");
            JobResponse::Failed(e.to_string())
        }
    };

    write_frame(&mut stream, &response).await?;
    Ok(())
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
