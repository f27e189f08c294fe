use crate::errors::{Result, WorkerError};

use async_trait::async_trait;
use simcloud_core::{JobResult, JobSpec};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Executes one job. The payload is opaque to the service; what running it
/// means is entirely up to the implementation.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: JobSpec) -> Result<JobResult>;
}

/// Runs each job in an external simulation host process.
///
/// The job payload is written to the child's stdin as JSON; the child is
/// expected to print the result as a single JSON document on stdout and
/// exit zero. A non-zero exit or unparsable output is a job failure, which
/// is answered to the dispatcher, never fatal to the service.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: String,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(command: impl Into<String>) -> Self {
        ProcessRunner {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, job: JobSpec) -> Result<JobResult> {
        info!(command = %self.command, "launching simulation host process");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(&job.payload)?;
            // A host that exits without reading its input closes the pipe;
            // the exit status below is the authoritative verdict.
            if let Err(e) = stdin.write_all(&body).await {
                debug!(error = %e, "host process closed stdin early");
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(WorkerError::HostProcess(format!(
                "exited with {}",
                output.status
            )));
        }

        let payload = serde_json::from_slice(&output.stdout)
            .map_err(|e| WorkerError::HostProcess(format!("unparsable result: {}", e)))?;
        Ok(JobResult::new(payload))
    }
}
