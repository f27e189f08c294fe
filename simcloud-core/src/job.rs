use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work submitted by a caller.
///
/// The payload is an opaque JSON document; the dispatcher never inspects it
/// and hands it to the worker service verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub payload: Value,
}

impl JobSpec {
    pub fn new(payload: Value) -> Self {
        JobSpec { payload }
    }
}

/// The opaque result a worker returns for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub payload: Value,
}

impl JobResult {
    pub fn new(payload: Value) -> Self {
        JobResult { payload }
    }
}
