//! Job testing utilities.
//!
//! [`ExecutionProbe`] builds instrumented executables that record when they
//! start and finish, so tests can assert ordering and serial execution.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::JobError;
use super::job::{JobRecord, JobStatus};
use super::manager::JobManager;
use super::queue::JobFuture;

#[derive(Default)]
struct ProbeState {
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ProbeState {
    fn enter(&self, label: &str) {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(label.to_string());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
    }

    fn exit(&self, label: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(label.to_string());
    }
}

/// Shared recorder for executables built in tests.
#[derive(Clone, Default)]
pub struct ExecutionProbe {
    state: Arc<ProbeState>,
}

impl ExecutionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executable that returns `Ok(())` right away.
    pub fn succeed(
        &self,
        label: &str,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static {
        self.instrument(label, |_token| async { Ok(()) })
    }

    /// Executable that fails with `message`.
    pub fn fail(
        &self,
        label: &str,
        message: &str,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static {
        let message = message.to_string();
        self.instrument(label, move |_token| async move { Err(anyhow!(message)) })
    }

    /// Executable that sleeps for `duration` and ignores its token.
    pub fn sleep(
        &self,
        label: &str,
        duration: Duration,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static {
        self.instrument(label, move |_token| async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    /// Executable that runs until its token fires, then unwinds with
    /// [`JobError::Cancelled`].
    pub fn until_cancelled(
        &self,
        label: &str,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static {
        self.instrument(label, |token: CancellationToken| async move {
            token.cancelled().await;
            Err(JobError::Cancelled.into())
        })
    }

    /// Labels in the order their executables started.
    pub fn started(&self) -> Vec<String> {
        self.state
            .started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Labels in the order their executables finished.
    pub fn finished(&self) -> Vec<String> {
        self.state
            .finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Highest number of probe executables observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }

    fn instrument<B, Fut>(
        &self,
        label: &str,
        body: B,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static
    where
        B: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let state = self.state.clone();
        let label = label.to_string();

        move |token: CancellationToken| -> JobFuture {
            Box::pin(async move {
                state.enter(&label);
                let result = body(token).await;
                state.exit(&label);
                result
            })
        }
    }
}

/// Poll until the job reaches `status` or `timeout` elapses.
pub async fn wait_for_status(
    manager: &JobManager,
    id: Uuid,
    status: JobStatus,
    timeout: Duration,
) -> Option<JobRecord> {
    wait_until(manager, id, timeout, |record| record.status == status).await
}

/// Poll until the job is terminal or `timeout` elapses.
pub async fn wait_for_terminal(
    manager: &JobManager,
    id: Uuid,
    timeout: Duration,
) -> Option<JobRecord> {
    wait_until(manager, id, timeout, JobRecord::is_terminal).await
}

async fn wait_until(
    manager: &JobManager,
    id: Uuid,
    timeout: Duration,
    done: impl Fn(&JobRecord) -> bool,
) -> Option<JobRecord> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(record) = manager.get_job(id).filter(|record| done(record)) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .ok()
}
