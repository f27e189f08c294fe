use thiserror::Error;

/// Errors on the framed job wire and the registry datagram path.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
}

/// Errors produced while driving one job exchange over an open session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] WireError),

    #[error("job failed on worker: {0}")]
    Worker(String),
}

/// Discovery collaborator failures.
///
/// Both variants are non-fatal to the dispatcher: the cluster view degrades
/// to its last-known state and the outage is edge-logged.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("no worker registered under tag {0}")]
    NotFound(String),
}
