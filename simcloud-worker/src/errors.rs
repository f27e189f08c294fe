use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("wire error: {0}")]
    Wire(#[from] simcloud_core::WireError),

    #[error("host process failed: {0}")]
    HostProcess(String),
}
