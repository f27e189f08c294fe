//! Load-aware dispatcher for simulation jobs.
//!
//! [`SimManager`] distributes a batch of opaque jobs across worker machines
//! discovered dynamically through a [`Discovery`] collaborator: a scheduler
//! task reconciles a cached cluster view against discovery before every
//! selection, picks the least-loaded worker with a two-tier (idle, then
//! single-job) heuristic, opens one session per job and correlates the
//! asynchronous responses back into a result buffer that the synchronous
//! batch facade drains.
//!
//! [`Discovery`]: simcloud_core::Discovery

mod cluster_view;
mod connection;
mod errors;
mod manager;
mod selector;
mod settings;
mod transport;

pub use cluster_view::WorkerInfo;
pub use errors::{DispatchError, Result};
pub use manager::SimManager;
pub use settings::ManagerSettings;
pub use transport::TcpTransport;
