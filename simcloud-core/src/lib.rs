//! Shared types and contracts for the simcloud job dispatcher.
//!
//! This crate holds everything the dispatcher, the registry and the worker
//! service agree on: the opaque job/result payloads, the worker identity,
//! the discovery and transport contracts, and the wire protocol used on
//! the job (TCP) and registry (UDP) paths.

mod discovery;
mod errors;
mod identity;
mod job;
mod transport;
pub mod wire;

pub use discovery::Discovery;
pub use errors::{DiscoveryError, SessionError, WireError};
pub use identity::WorkerId;
pub use job::{JobResult, JobSpec};
pub use transport::{WorkerSession, WorkerTransport};
