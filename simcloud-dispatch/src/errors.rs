use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced to callers of the batch facade.
///
/// Everything else (discovery outages, connection failures, orphan
/// responses) is handled inside the dispatcher and never propagates.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a batch is already in flight on this manager")]
    BatchAlreadyRunning,

    #[error("the manager has been stopped and accepts no new work")]
    ManagerStopped,
}
