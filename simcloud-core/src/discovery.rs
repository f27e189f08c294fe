use crate::errors::DiscoveryError;
use crate::identity::WorkerId;

use async_trait::async_trait;

/// Contract for enumerating the workers currently reachable on the network.
///
/// Implementations may answer from a registry, a static list or a test
/// double. An empty steady state (no worker present) surfaces as
/// `DiscoveryError::NotFound` and callers must tolerate it.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, tag: &str) -> Result<Vec<WorkerId>, DiscoveryError>;
}
