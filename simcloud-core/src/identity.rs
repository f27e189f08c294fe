use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Identity of a worker machine, derived from its service endpoint.
///
/// Two identities are equal iff host and port are equal; the pair is used
/// directly as the cluster view map key instead of a hash of the tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    /// Hostname or IP address the worker service listens on
    pub host: String,
    /// TCP port of the worker job service
    pub port: u16,
}

impl WorkerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        WorkerId {
            host: host.into(),
            port,
        }
    }

    /// Endpoint in `host:port` form, suitable for `TcpStream::connect`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
