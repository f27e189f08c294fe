use dashmap::DashMap;
use simcloud_core::WorkerId;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// One in-flight dispatched job: the worker it went to and the listener
/// task that will correlate its response. The listener handle is filled in
/// right after the task is spawned; a correlation racing ahead of that is
/// fine since the entry is already tracked.
pub(crate) struct OpenConnection {
    pub(crate) worker: WorkerId,
    pub(crate) listener: Option<JoinHandle<()>>,
}

/// The open-connection set: exactly one entry per in-flight job, keyed by a
/// monotonically allocated connection id.
pub(crate) struct ConnectionSet {
    entries: DashMap<u64, OpenConnection>,
    next_id: AtomicU64,
}

impl ConnectionSet {
    pub(crate) fn new() -> Self {
        ConnectionSet {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn track(&self, id: u64, worker: WorkerId) {
        self.entries.insert(
            id,
            OpenConnection {
                worker,
                listener: None,
            },
        );
    }

    pub(crate) fn attach_listener(&self, id: u64, listener: JoinHandle<()>) {
        // The entry may already be gone when the listener finished before
        // we got here; the handle of a finished task needs no tracking.
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.listener = Some(listener);
        }
    }

    /// Remove and return the connection for `id`, if still tracked.
    pub(crate) fn untrack(&self, id: u64) -> Option<OpenConnection> {
        self.entries.remove(&id).map(|(_, connection)| connection)
    }

    /// Abort every listener and drop all entries. Used by the forced
    /// teardown after an interrupt; in-flight work on the workers is not
    /// cancelled remotely.
    pub(crate) fn abort_all(&self) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, connection)) = self.entries.remove(&id) {
                if let Some(listener) = connection.listener {
                    listener.abort();
                }
                aborted += 1;
            }
        }
        aborted
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
