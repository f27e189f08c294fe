//! Wire protocol for the job path (framed JSON over TCP) and the registry
//! path (JSON datagrams over UDP).

use crate::errors::WireError;
use crate::identity::WorkerId;
use crate::job::{JobResult, JobSpec};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single job frame. Simulation payloads are small option
/// maps; anything past this is a protocol violation, not a big job.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Request carrying one job to a worker service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job: JobSpec,
}

/// Worker answer for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobResponse {
    Completed(JobResult),
    Failed(String),
}

/// Datagrams understood by the registry service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryMessage {
    /// A worker advertises its job service under `tag`; the registry records
    /// the datagram's source address together with `port`.
    Register { tag: String, port: u16 },
    /// A worker withdraws its advertisement.
    Unregister { tag: String, port: u16 },
    /// Ask for the workers currently advertising `tag`.
    Discover { tag: String },
    /// Reply to `Discover`.
    Workers { workers: Vec<WorkerId> },
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
