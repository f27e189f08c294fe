use crate::selector::select_candidate;

use simcloud_core::{Discovery, WorkerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One row of a cluster snapshot: a worker and its outstanding-job count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker: WorkerId,
    pub outstanding: u32,
}

/// The dispatcher's cached belief about worker membership and load.
///
/// Membership is reconciled against the discovery collaborator on every
/// refresh; the load counters are touched only by the dispatch path
/// (charge) and the response correlator (release). The membership map and
/// the address cache each sit behind their own lock and no operation holds
/// both at once.
pub(crate) struct ClusterView {
    workers: Mutex<HashMap<WorkerId, u32>>,
    address_cache: Mutex<Vec<WorkerId>>,
    // Edge-triggered discovery logging: log the outage once on the first
    // failure after a success and the recovery once on the first success
    // after a failure, instead of flooding on every poll.
    registry_reachable: AtomicBool,
}

impl ClusterView {
    pub(crate) fn new() -> Self {
        ClusterView {
            workers: Mutex::new(HashMap::new()),
            address_cache: Mutex::new(Vec::new()),
            registry_reachable: AtomicBool::new(true),
        }
    }

    /// Reconcile the view against the discovery collaborator.
    ///
    /// On success the address cache is replaced; on failure (including the
    /// "no worker registered" steady state, which the discovery primitive
    /// cannot tell apart from an outage) it is left as last-known. Workers
    /// newly advertised are added at load 0; workers no longer advertised
    /// are evicted even when their load is nonzero; survivors keep their
    /// load untouched.
    pub(crate) async fn refresh(&self, discovery: &dyn Discovery, tag: &str) {
        match discovery.discover(tag).await {
            Ok(advertised) => {
                if !self.registry_reachable.swap(true, Ordering::SeqCst) {
                    info!(tag = %tag, workers = advertised.len(), "simulation workers found on the network again");
                }
                debug!(tag = %tag, workers = ?advertised, "discovery answered");
                *self.address_cache.lock().await = advertised;
            }
            Err(e) => {
                if self.registry_reachable.swap(false, Ordering::SeqCst) {
                    info!(tag = %tag, error = %e, "simulation workers not found on the network");
                }
            }
        }

        let advertised = self.address_cache.lock().await.clone();
        let mut workers = self.workers.lock().await;
        for worker in &advertised {
            workers.entry(worker.clone()).or_insert(0);
        }
        workers.retain(|worker, outstanding| {
            let advertised = advertised.contains(worker);
            if !advertised && *outstanding > 0 {
                info!(worker = %worker, outstanding = *outstanding, "evicting worker with jobs still in flight");
            }
            advertised
        });
    }

    /// Pick the best worker for the next job, or none.
    pub(crate) async fn select_candidate(&self) -> Option<WorkerId> {
        let workers = self.workers.lock().await;
        select_candidate(&workers)
    }

    /// Charge one outstanding job to a worker. Called once per successful
    /// session open; a failed open never charges.
    pub(crate) async fn charge(&self, worker: &WorkerId) {
        let mut workers = self.workers.lock().await;
        if let Some(outstanding) = workers.get_mut(worker) {
            *outstanding += 1;
        }
    }

    /// Release one outstanding job from a worker. Returns false when the
    /// worker has been evicted in the meantime; the bookkeeping for a
    /// vanished worker is simply dropped.
    pub(crate) async fn release(&self, worker: &WorkerId) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(worker) {
            Some(outstanding) => {
                *outstanding = outstanding.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    /// Read-only snapshot for diagnostics.
    pub(crate) async fn snapshot(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.lock().await;
        workers
            .iter()
            .map(|(worker, outstanding)| WorkerInfo {
                worker: worker.clone(),
                outstanding: *outstanding,
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "cluster_view_test.rs"]
mod tests;
