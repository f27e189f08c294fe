use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Discovery tag the workers advertise under
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Scheduler and batch-facade poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period between an interrupt and the forced teardown
    #[serde(default = "default_interrupt_grace_ms")]
    pub interrupt_grace_ms: u64,
}

fn default_tag() -> String {
    "cloudsim".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_interrupt_grace_ms() -> u64 {
    3_000
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings {
            tag: default_tag(),
            poll_interval_ms: default_poll_interval_ms(),
            interrupt_grace_ms: default_interrupt_grace_ms(),
        }
    }
}

impl ManagerSettings {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub(crate) fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }
}
