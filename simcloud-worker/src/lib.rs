//! Worker-side job service.
//!
//! A thin TCP server that accepts exactly one job per connection, hands it
//! to a pluggable [`JobRunner`] and answers with the result or a failure.
//! When a registry address is configured the service keeps itself
//! registered under its tag on a keep-alive interval; the registration
//! lapses on the registry side once the worker stops.

mod errors;
mod runner;
mod service;

pub use errors::{Result, WorkerError};
pub use runner::{JobRunner, ProcessRunner};
pub use service::{WorkerHandle, WorkerService, WorkerSettings};
