//! UDP registry for simcloud workers.
//!
//! Workers advertise their job service under a tag with periodic `Register`
//! datagrams and lapse after a pruning timeout; the dispatcher's discovery
//! client queries the registry with `Discover` and receives the live worker
//! list back. The protocol lives in `simcloud_core::wire::RegistryMessage`.

mod client;
mod errors;
mod server;

pub use client::RegistryClient;
pub use errors::{RegistryError, Result};
pub use server::{RegistryHandle, RegistryServer, RegistrySettings};
