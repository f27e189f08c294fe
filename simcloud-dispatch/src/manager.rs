use crate::cluster_view::{ClusterView, WorkerInfo};
use crate::connection::ConnectionSet;
use crate::errors::{DispatchError, Result};
use crate::settings::ManagerSettings;

use simcloud_core::{Discovery, JobResult, JobSpec, SessionError, WorkerId, WorkerTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// High-level interface distributing simulation jobs across the workers
/// currently discoverable on the network.
///
/// One scheduler task per manager pulls pending jobs, reconciles the
/// cluster view against discovery, selects the least-loaded candidate and
/// dispatches asynchronously; one listener task per dispatched job
/// correlates the response back. The batch facade enqueues a job list and
/// waits for the results.
///
/// ```no_run
/// # use simcloud_dispatch::{ManagerSettings, SimManager, TcpTransport};
/// # use simcloud_core::{Discovery, JobSpec};
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # async fn example(discovery: Arc<dyn Discovery>, jobs: Vec<JobSpec>) -> anyhow::Result<()> {
/// let manager = SimManager::new(ManagerSettings::default(), discovery, Arc::new(TcpTransport));
/// manager.start();
/// let results = manager.run_batch(jobs, Duration::from_secs(600)).await?;
/// manager.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SimManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    settings: ManagerSettings,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn WorkerTransport>,
    cluster: ClusterView,
    pending: Mutex<VecDeque<JobSpec>>,
    results: Mutex<Vec<JobResult>>,
    connections: ConnectionSet,
    started: AtomicBool,
    stop_requested: AtomicBool,
    interrupted: AtomicBool,
    terminated: AtomicBool,
    batch_in_flight: AtomicBool,
    // Whether the last selection attempt found a worker; a stopped manager
    // drains its queue only while this holds, so stopping on a dead cluster
    // does not spin forever.
    worker_available: AtomicBool,
}

impl SimManager {
    pub fn new(
        settings: ManagerSettings,
        discovery: Arc<dyn Discovery>,
        transport: Arc<dyn WorkerTransport>,
    ) -> Self {
        SimManager {
            inner: Arc::new(ManagerInner {
                settings,
                discovery,
                transport,
                cluster: ClusterView::new(),
                pending: Mutex::new(VecDeque::new()),
                results: Mutex::new(Vec::new()),
                connections: ConnectionSet::new(),
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                batch_in_flight: AtomicBool::new(false),
                worker_available: AtomicBool::new(true),
            }),
        }
    }

    /// Spawn the scheduler task. Idempotent; the second call is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("manager already started");
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.dispatch_loop().await });
    }

    /// Signal the scheduler to stop. Non-blocking: already-queued jobs keep
    /// dispatching while a worker is available, new batches are rejected.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Caller-initiated interrupt of the running batch wait: the facade
    /// stops the manager, grants a short grace period, then forces teardown
    /// and returns whatever has arrived.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    /// Whether the scheduler loop has exited.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Number of dispatched jobs whose response is still outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.connections.len()
    }

    /// Read-only snapshot of the cluster view for diagnostics.
    pub async fn cluster_snapshot(&self) -> Vec<WorkerInfo> {
        self.inner.cluster.snapshot().await
    }

    /// Enqueue a batch of jobs and wait for its results.
    ///
    /// At most one batch may be in flight per manager; a second call while
    /// the previous batch is still draining is rejected. The wait ends when
    /// all results have arrived, the scheduler has terminated, `timeout`
    /// elapses, or an interrupt's grace period runs out. The returned
    /// results are in arrival order, not submission order, and there may be
    /// fewer than requested; in-flight jobs are never cancelled remotely.
    pub async fn run_batch(
        &self,
        jobs: Vec<JobSpec>,
        timeout: Duration,
    ) -> Result<Vec<JobResult>> {
        if self.inner.stop_requested.load(Ordering::SeqCst) {
            return Err(DispatchError::ManagerStopped);
        }
        if self.inner.batch_in_flight.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::BatchAlreadyRunning);
        }
        // A timed-out batch may have left jobs queued; they still belong to
        // the previous batch until the queue drains.
        if !self.inner.pending.lock().await.is_empty() {
            self.inner.batch_in_flight.store(false, Ordering::SeqCst);
            return Err(DispatchError::BatchAlreadyRunning);
        }

        let expected = jobs.len();
        info!(jobs = expected, "batch submitted");
        self.inner.pending.lock().await.extend(jobs);

        let started = Instant::now();
        let poll = self.inner.settings.poll_interval();
        let grace = self.inner.settings.interrupt_grace();
        let mut interrupt_deadline: Option<Instant> = None;

        loop {
            let collected = self.inner.results.lock().await.len();
            let queued = self.inner.pending.lock().await.len();
            if collected >= expected && queued == 0 {
                break;
            }
            // An interrupt stops the scheduler itself, so a pending grace
            // period outranks the terminated check: the teardown below must
            // still run.
            if self.inner.terminated.load(Ordering::SeqCst) && interrupt_deadline.is_none() {
                warn!(collected, expected, "scheduler terminated while a batch was waiting");
                break;
            }
            if self.inner.interrupted.load(Ordering::SeqCst) {
                match interrupt_deadline {
                    None => {
                        warn!("batch interrupted, stopping the manager and starting the grace period");
                        self.stop();
                        interrupt_deadline = Some(Instant::now() + grace);
                    }
                    Some(deadline) if Instant::now() >= deadline => {
                        let aborted = self.inner.connections.abort_all();
                        warn!(aborted, "interrupt grace elapsed, forcing teardown");
                        break;
                    }
                    Some(_) => {}
                }
            }
            if started.elapsed() >= timeout {
                warn!(collected, expected, "batch wait timed out");
                break;
            }
            sleep(poll).await;
        }

        let results = {
            let mut buffer = self.inner.results.lock().await;
            std::mem::take(&mut *buffer)
        };
        self.inner.batch_in_flight.store(false, Ordering::SeqCst);
        info!(collected = results.len(), expected, "batch finished");
        Ok(results)
    }
}

impl ManagerInner {
    /// Scheduler loop: two effective states, idle (no job or no candidate,
    /// sleep one poll interval) and dispatching. Runs until stop is
    /// signaled and the queue has drained or no worker is available.
    async fn dispatch_loop(self: Arc<Self>) {
        info!(tag = %self.settings.tag, "simulation manager loop started");
        let poll = self.settings.poll_interval();

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                let drained = self.pending.lock().await.is_empty();
                if drained || !self.worker_available.load(Ordering::SeqCst) {
                    break;
                }
            }

            if self.pending.lock().await.is_empty() {
                sleep(poll).await;
                continue;
            }

            self.cluster
                .refresh(self.discovery.as_ref(), &self.settings.tag)
                .await;

            let Some(worker) = self.cluster.select_candidate().await else {
                self.worker_available.store(false, Ordering::SeqCst);
                sleep(poll).await;
                continue;
            };
            self.worker_available.store(true, Ordering::SeqCst);

            let job = self.pending.lock().await.pop_front();
            if let Some(job) = job {
                self.dispatch(job, worker).await;
            }
        }

        info!("simulation manager loop terminated");
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Open a session to the selected worker and issue the job. The worker
    /// is charged only after the session opened; a failed open requeues the
    /// job at the front of the queue for the next iteration.
    async fn dispatch(self: &Arc<Self>, job: JobSpec, worker: WorkerId) {
        info!(worker = %worker, "dispatching job");
        let mut session = match self.transport.open(&worker).await {
            Ok(session) => session,
            Err(e) => {
                error!(worker = %worker, error = %e, "unable to open a session, requeueing job");
                self.pending.lock().await.push_front(job);
                return;
            }
        };

        self.cluster.charge(&worker).await;

        let connection_id = self.connections.next_id();
        self.connections.track(connection_id, worker);

        let inner = Arc::clone(self);
        let listener = tokio::spawn(async move {
            let outcome = session.run_job(job).await;
            inner.correlate(connection_id, outcome).await;
        });
        self.connections.attach_listener(connection_id, listener);
    }

    /// Response correlator: runs on the listener task, concurrently with
    /// the scheduler and other correlations, exactly once per connection.
    async fn correlate(
        &self,
        connection_id: u64,
        outcome: std::result::Result<JobResult, SessionError>,
    ) {
        let Some(connection) = self.connections.untrack(connection_id) else {
            warn!(connection = connection_id, "response for an untracked connection, dropping it");
            return;
        };

        if !self.cluster.release(&connection.worker).await {
            warn!(
                worker = %connection.worker,
                connection = connection_id,
                "worker vanished from the cluster view mid-flight, dropping orphan response"
            );
            return;
        }

        match outcome {
            Ok(result) => {
                info!(worker = %connection.worker, "response received");
                self.results.lock().await.push(result);
            }
            Err(e) => {
                error!(worker = %connection.worker, error = %e, "job failed on worker");
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
