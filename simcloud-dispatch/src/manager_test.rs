//! Dispatcher behavior tests against scripted discovery and transport
//! doubles: batch completion and dispatch ordering, starvation on an empty
//! or saturated cluster, orphaned responses from evicted workers,
//! connect-failure requeueing, stop semantics and interrupt teardown.

use super::*;

use async_trait::async_trait;
use serde_json::json;
use simcloud_core::{DiscoveryError, WireError, WorkerSession};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use tokio::sync::Notify;

/// Discovery double whose answer can be swapped while the manager runs.
struct ScriptedDiscovery {
    answer: Mutex<std::result::Result<Vec<WorkerId>, String>>,
}

impl ScriptedDiscovery {
    fn answering(workers: Vec<WorkerId>) -> Arc<Self> {
        Arc::new(ScriptedDiscovery {
            answer: Mutex::new(Ok(workers)),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(ScriptedDiscovery {
            answer: Mutex::new(Err("registry down".to_string())),
        })
    }

    async fn set(&self, workers: Vec<WorkerId>) {
        *self.answer.lock().await = Ok(workers);
    }
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    async fn discover(&self, _tag: &str) -> std::result::Result<Vec<WorkerId>, DiscoveryError> {
        self.answer
            .lock()
            .await
            .clone()
            .map_err(DiscoveryError::Unreachable)
    }
}

/// How a scripted session answers a job.
#[derive(Clone)]
enum Behavior {
    /// Echo the job payload back after a delay.
    Echo { delay: Duration },
    /// Park until the gate is notified, then echo.
    HoldUntil(Arc<Notify>),
}

fn echo(delay_ms: u64) -> Behavior {
    Behavior::Echo {
        delay: Duration::from_millis(delay_ms),
    }
}

/// Transport double: sessions answer per a scripted behavior and record
/// every job they receive, in dispatch order.
struct TestTransport {
    default: Behavior,
    per_worker: HashMap<WorkerId, Behavior>,
    refuse_next: AtomicUsize,
    opens: AtomicUsize,
    log: Arc<Mutex<Vec<(WorkerId, serde_json::Value)>>>,
}

impl TestTransport {
    fn answering(default: Behavior) -> Self {
        TestTransport {
            default,
            per_worker: HashMap::new(),
            refuse_next: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn dispatched(&self) -> Vec<u64> {
        self.log
            .lock()
            .await
            .iter()
            .map(|(_, payload)| payload["run"].as_u64().unwrap())
            .collect()
    }
}

#[async_trait]
impl WorkerTransport for TestTransport {
    async fn open(
        &self,
        worker: &WorkerId,
    ) -> std::result::Result<Box<dyn WorkerSession>, WireError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let behavior = self
            .per_worker
            .get(worker)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Ok(Box::new(TestSession {
            worker: worker.clone(),
            behavior,
            log: Arc::clone(&self.log),
        }))
    }
}

struct TestSession {
    worker: WorkerId,
    behavior: Behavior,
    log: Arc<Mutex<Vec<(WorkerId, serde_json::Value)>>>,
}

#[async_trait]
impl WorkerSession for TestSession {
    async fn run_job(&mut self, job: JobSpec) -> std::result::Result<JobResult, SessionError> {
        self.log
            .lock()
            .await
            .push((self.worker.clone(), job.payload.clone()));
        match &self.behavior {
            Behavior::Echo { delay } => {
                sleep(*delay).await;
                Ok(JobResult::new(job.payload))
            }
            Behavior::HoldUntil(gate) => {
                gate.notified().await;
                Ok(JobResult::new(job.payload))
            }
        }
    }
}

fn worker(n: u16) -> WorkerId {
    WorkerId::new(format!("10.0.0.{}", n), 18861)
}

fn job(n: u64) -> JobSpec {
    JobSpec::new(json!({ "run": n }))
}

fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        tag: "cloudsim".to_string(),
        poll_interval_ms: 5,
        interrupt_grace_ms: 40,
    }
}

fn started_manager(
    discovery: &Arc<ScriptedDiscovery>,
    transport: &Arc<TestTransport>,
) -> SimManager {
    let manager = SimManager::new(
        fast_settings(),
        Arc::clone(discovery) as Arc<dyn Discovery>,
        Arc::clone(transport) as Arc<dyn WorkerTransport>,
    );
    manager.start();
    manager
}

async fn wait_for_dispatches(transport: &Arc<TestTransport>, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.log.lock().await.len() < n {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} dispatches",
            n
        );
        sleep(Duration::from_millis(2)).await;
    }
}

async fn wait_for_in_flight(manager: &SimManager, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while manager.in_flight() != n {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} in-flight jobs",
            n
        );
        sleep(Duration::from_millis(2)).await;
    }
}

async fn wait_until_terminated(manager: &SimManager) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !manager.is_terminated() {
        assert!(Instant::now() < deadline, "scheduler did not terminate");
        sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn a_batch_completes_and_dispatches_in_submission_order() {
    let discovery = ScriptedDiscovery::answering(vec![worker(1), worker(2), worker(3)]);
    let transport = Arc::new(TestTransport::answering(echo(20)));
    let manager = started_manager(&discovery, &transport);

    let jobs: Vec<JobSpec> = (0..5).map(job).collect();
    let results = manager
        .run_batch(jobs, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    let mut answered: Vec<u64> = results
        .iter()
        .map(|r| r.payload["run"].as_u64().unwrap())
        .collect();
    answered.sort_unstable();
    assert_eq!(answered, vec![0, 1, 2, 3, 4]);

    assert_eq!(
        transport.dispatched().await,
        vec![0, 1, 2, 3, 4],
        "jobs leave the queue in submission order"
    );

    // The first three dispatches land on three distinct idle workers
    // before anyone is handed a second job.
    let log = transport.log.lock().await;
    let first: HashSet<WorkerId> = log[..3].iter().map(|(w, _)| w.clone()).collect();
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn an_unreachable_registry_yields_an_empty_batch_and_a_clean_stop() {
    let discovery = ScriptedDiscovery::failing();
    let transport = Arc::new(TestTransport::answering(echo(0)));
    let manager = started_manager(&discovery, &transport);

    let results = manager
        .run_batch(vec![job(0)], Duration::from_millis(150))
        .await
        .unwrap();
    assert!(results.is_empty(), "no worker ever ran the job");
    assert!(transport.log.lock().await.is_empty());

    // The queued job never found a worker, so stop exits immediately
    // instead of waiting for a drain.
    manager.stop();
    wait_until_terminated(&manager).await;
}

#[tokio::test]
async fn responses_from_evicted_workers_are_dropped() {
    let gate = Arc::new(Notify::new());
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let mut transport = TestTransport::answering(echo(0));
    transport
        .per_worker
        .insert(worker(1), Behavior::HoldUntil(Arc::clone(&gate)));
    let transport = Arc::new(transport);
    let manager = started_manager(&discovery, &transport);

    let batch = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .run_batch((0..3).map(job).collect(), Duration::from_millis(400))
                .await
        })
    };

    // Both slots of the only worker fill up; the third job starves.
    wait_for_dispatches(&transport, 2).await;
    // The loaded worker drops off the registry and a fresh one appears;
    // the starved job goes to the newcomer.
    discovery.set(vec![worker(2)]).await;
    wait_for_dispatches(&transport, 3).await;
    // The evicted worker finally answers. Both responses are orphans.
    gate.notify_waiters();

    let results = batch.await.unwrap().unwrap();
    assert_eq!(results.len(), 1, "only the newcomer's result is kept");
    assert_eq!(results[0].payload["run"], 2);

    wait_for_in_flight(&manager, 0).await;
    let snapshot = manager.cluster_snapshot().await;
    assert_eq!(
        snapshot,
        vec![WorkerInfo {
            worker: worker(2),
            outstanding: 0
        }]
    );
}

#[tokio::test]
async fn a_second_batch_is_rejected_while_one_is_in_flight() {
    let gate = Arc::new(Notify::new());
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let transport = Arc::new(TestTransport::answering(Behavior::HoldUntil(Arc::clone(
        &gate,
    ))));
    let manager = started_manager(&discovery, &transport);

    let batch = {
        let manager = manager.clone();
        tokio::spawn(
            async move { manager.run_batch(vec![job(0)], Duration::from_secs(2)).await },
        )
    };
    wait_for_in_flight(&manager, 1).await;

    let rejected = manager.run_batch(vec![job(1)], Duration::from_secs(1)).await;
    assert!(matches!(rejected, Err(DispatchError::BatchAlreadyRunning)));

    gate.notify_waiters();
    let results = batch.await.unwrap().unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn a_stopped_manager_accepts_no_new_batches() {
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let transport = Arc::new(TestTransport::answering(echo(0)));
    let manager = started_manager(&discovery, &transport);

    manager.stop();
    let rejected = manager.run_batch(vec![job(0)], Duration::from_secs(1)).await;
    assert!(matches!(rejected, Err(DispatchError::ManagerStopped)));
    wait_until_terminated(&manager).await;
}

#[tokio::test]
async fn a_failed_connect_requeues_the_job_at_the_front() {
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let transport = TestTransport::answering(echo(0));
    transport.refuse_next.store(1, Ordering::SeqCst);
    let transport = Arc::new(transport);
    let manager = started_manager(&discovery, &transport);

    let results = manager
        .run_batch(vec![job(0), job(1)], Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        transport.dispatched().await,
        vec![0, 1],
        "the refused job is retried before the next one is attempted"
    );
    assert!(transport.opens.load(Ordering::SeqCst) >= 3);

    // A failed open never charged the worker.
    let snapshot = manager.cluster_snapshot().await;
    assert_eq!(snapshot[0].outstanding, 0);
}

#[tokio::test]
async fn jobs_dispatched_before_a_stop_still_complete() {
    let discovery = ScriptedDiscovery::answering(vec![worker(1), worker(2), worker(3)]);
    let transport = Arc::new(TestTransport::answering(echo(30)));
    let manager = started_manager(&discovery, &transport);

    let batch = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .run_batch((0..3).map(job).collect(), Duration::from_secs(2))
                .await
        })
    };

    wait_for_dispatches(&transport, 3).await;
    manager.stop();

    let results = batch.await.unwrap().unwrap();
    assert_eq!(results.len(), 3, "in-flight responses still correlate after stop");
    wait_until_terminated(&manager).await;
}

#[tokio::test]
async fn consecutive_batches_run_on_the_same_manager() {
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let transport = Arc::new(TestTransport::answering(echo(0)));
    let manager = started_manager(&discovery, &transport);

    let first = manager
        .run_batch(vec![job(0), job(1)], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    let second = manager
        .run_batch(vec![job(2)], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].payload["run"], 2);
}

#[tokio::test]
async fn an_interrupt_force_closes_in_flight_connections_after_the_grace() {
    let gate = Arc::new(Notify::new());
    let discovery = ScriptedDiscovery::answering(vec![worker(1)]);
    let transport = Arc::new(TestTransport::answering(Behavior::HoldUntil(Arc::clone(
        &gate,
    ))));
    let manager = started_manager(&discovery, &transport);

    let batch = {
        let manager = manager.clone();
        tokio::spawn(
            async move { manager.run_batch(vec![job(0)], Duration::from_secs(5)).await },
        )
    };
    wait_for_in_flight(&manager, 1).await;

    let interrupted_at = Instant::now();
    manager.interrupt();

    let results = batch.await.unwrap().unwrap();
    assert!(results.is_empty(), "the held job never answered");
    assert!(
        interrupted_at.elapsed() < Duration::from_secs(1),
        "the facade returns after the grace period, not the batch timeout"
    );
    wait_until_terminated(&manager).await;
    assert_eq!(manager.in_flight(), 0, "the held connection was torn down");
}
