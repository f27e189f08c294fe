use async_trait::async_trait;
use simcloud_core::wire::{read_frame, write_frame, JobRequest, JobResponse};
use simcloud_core::{JobResult, JobSpec, SessionError, WireError, WorkerId, WorkerSession, WorkerTransport};
use tokio::net::TcpStream;
use tracing::debug;

/// Default transport: one TCP connection per dispatched job, framed JSON
/// request/response against the worker service.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

#[async_trait]
impl WorkerTransport for TcpTransport {
    async fn open(&self, worker: &WorkerId) -> Result<Box<dyn WorkerSession>, WireError> {
        let stream = TcpStream::connect((worker.host.as_str(), worker.port)).await?;
        debug!(worker = %worker, "session opened");
        Ok(Box::new(TcpSession { stream }))
    }
}

struct TcpSession {
    stream: TcpStream,
}

#[async_trait]
impl WorkerSession for TcpSession {
    async fn run_job(&mut self, job: JobSpec) -> Result<JobResult, SessionError> {
        write_frame(&mut self.stream, &JobRequest { job }).await?;
        match read_frame::<_, JobResponse>(&mut self.stream).await? {
            JobResponse::Completed(result) => Ok(result),
            JobResponse::Failed(message) => Err(SessionError::Worker(message)),
        }
    }
}
