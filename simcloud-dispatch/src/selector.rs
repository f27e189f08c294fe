use simcloud_core::WorkerId;
use std::collections::HashMap;

/// Two-tier candidate selection over the cluster membership.
///
/// First pass returns any idle worker (load 0); second pass any worker with
/// a single outstanding job (load 1); otherwise none. The tie-break among
/// equally eligible workers is map iteration order and deliberately
/// unspecified. This is a load-spreading policy, not a global minimum
/// search: a worker at load 2 or more is never selected, even when every
/// worker is at load 2.
pub(crate) fn select_candidate(workers: &HashMap<WorkerId, u32>) -> Option<WorkerId> {
    for (worker, load) in workers {
        if *load == 0 {
            return Some(worker.clone());
        }
    }
    for (worker, load) in workers {
        if *load == 1 {
            return Some(worker.clone());
        }
    }
    None
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod tests;
