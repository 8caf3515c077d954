//! Test harness for driving the engine end to end.
//!
//! Each test gets a fresh in-memory store, manager and probe. The worker is
//! started explicitly so tests can enqueue before it runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use job_engine::kernel::jobs::testing::{wait_for_status, wait_for_terminal, ExecutionProbe};
use job_engine::kernel::jobs::{
    InMemoryJobStore, JobCatalog, JobManager, JobRecord, JobStatus, JobWorker, JobWorkerConfig,
};
use test_context::AsyncTestContext;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long helpers wait for a job before giving up.
pub const WAIT: Duration = Duration::from_secs(5);

/// Test harness that owns one engine instance.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(EngineHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &EngineHarness) {
///     let id = ctx.manager.enqueue("Sync", ctx.probe.succeed("Sync")).await.unwrap();
///     ctx.start_worker();
///     // ... assertions
/// }
/// ```
pub struct EngineHarness {
    pub store: Arc<InMemoryJobStore>,
    pub manager: Arc<JobManager>,
    pub probe: ExecutionProbe,
    pub shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncTestContext for EngineHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {
        self.stop_worker().await;
    }
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_store_and_catalog(Arc::new(InMemoryJobStore::new()), JobCatalog::new())
    }

    /// Build over a pre-seeded store, e.g. to simulate a restart.
    pub fn with_store_and_catalog(store: Arc<InMemoryJobStore>, catalog: JobCatalog) -> Self {
        // Run tests with: RUST_LOG=job_engine=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let shutdown = CancellationToken::new();
        let manager = Arc::new(
            JobManager::new(store.clone())
                .with_catalog(catalog)
                .with_shutdown(shutdown.clone()),
        );

        Self {
            store,
            manager,
            probe: ExecutionProbe::new(),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Worker config with a short poll interval and the default heartbeat.
    pub fn worker_config() -> JobWorkerConfig {
        JobWorkerConfig::default().with_poll_interval(Duration::from_millis(20))
    }

    pub fn start_worker(&self) {
        self.start_worker_with(Self::worker_config());
    }

    pub fn start_worker_with(&self, config: JobWorkerConfig) {
        let worker = JobWorker::with_config(self.manager.clone(), config);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { worker.run_until_cancelled(shutdown).await });

        let previous = self.worker.lock().unwrap().replace(handle);
        assert!(previous.is_none(), "worker already started");
    }

    pub async fn stop_worker(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.await.expect("worker task panicked");
        }
    }

    pub async fn terminal(&self, id: Uuid) -> JobRecord {
        self.terminal_within(id, WAIT).await
    }

    /// Like [`terminal`](Self::terminal) with an explicit limit, for tests on
    /// paused time where jobs sleep for minutes.
    pub async fn terminal_within(&self, id: Uuid, timeout: Duration) -> JobRecord {
        wait_for_terminal(&self.manager, id, timeout)
            .await
            .unwrap_or_else(|| panic!("job {id} did not finish in time"))
    }

    pub async fn reach(&self, id: Uuid, status: JobStatus) -> JobRecord {
        wait_for_status(&self.manager, id, status, WAIT)
            .await
            .unwrap_or_else(|| panic!("job {id} never reached {status}"))
    }
}
