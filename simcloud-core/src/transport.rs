use crate::errors::{SessionError, WireError};
use crate::identity::WorkerId;
use crate::job::{JobResult, JobSpec};

use async_trait::async_trait;

/// Opens sessions to worker machines.
///
/// One session carries exactly one job; the dispatcher opens a fresh session
/// per dispatch and tears it down when the response has been correlated.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn open(&self, worker: &WorkerId) -> Result<Box<dyn WorkerSession>, WireError>;
}

/// One open session to a worker.
///
/// `run_job` drives a single request/response exchange and resolves exactly
/// once, with either the worker's result or a failure. The session is closed
/// by dropping it.
#[async_trait]
pub trait WorkerSession: Send {
    async fn run_job(&mut self, job: JobSpec) -> Result<JobResult, SessionError>;
}
