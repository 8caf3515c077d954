//! Job worker service for executing queued jobs.
//!
//! The `JobWorker` is a long-running service that:
//! - Pops work items from the manager's queue, one at a time
//! - Marks the record Running and starts a heartbeat
//! - Runs the executable on its own task with the job's cancellation token
//! - Stops the heartbeat, then records the terminal state
//!
//! # Architecture
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► try_dequeue (wait on Notify or poll interval when empty)
//!     ├─► set_job_started ──► skipped if the record is no longer Pending
//!     ├─► Heartbeat::start
//!     ├─► tokio::spawn(executable(job_token))
//!     ├─► Heartbeat::stop (joined)
//!     └─► set_job_completed(Completed | Failed | Cancelled)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let worker = JobWorker::new(manager.clone());
//!
//! ServiceHost::new()
//!     .with_service(worker)
//!     .run_until_shutdown()
//!     .await?;
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::JobError;
use super::events::JobEvent;
use super::heartbeat::Heartbeat;
use super::job::JobStatus;
use super::manager::JobManager;
use super::queue::WorkItem;
use crate::kernel::service_host::Service;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How long to wait when the queue is empty
    pub poll_interval: Duration,
    /// How often to send heartbeats for the running job
    pub heartbeat_interval: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

/// Serial FIFO worker over a [`JobManager`]'s queue.
pub struct JobWorker {
    manager: Arc<JobManager>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self::with_config(manager, JobWorkerConfig::default())
    }

    pub fn with_config(manager: Arc<JobManager>, config: JobWorkerConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Process jobs until `shutdown` fires.
    ///
    /// Shutdown also cancels the running job through its child token. Items
    /// still queued stay Pending and are picked up by orphan recovery on the
    /// next start.
    pub async fn run_until_cancelled(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.manager.try_dequeue() {
                Some(item) => self.process(item).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.manager.queue().notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        let queued = self.manager.queued_len();
        if queued > 0 {
            info!(count = queued, "leaving queued jobs pending");
        }
        info!("job worker stopped");
    }

    /// Drain the queue and return how many items were processed. Stops
    /// early once the manager's shutdown token fires.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while !self.manager.shutdown_token().is_cancelled() {
            let Some(item) = self.manager.try_dequeue() else {
                break;
            };
            self.process(item).await;
            processed += 1;
        }
        processed
    }

    /// Run one work item through its whole lifecycle.
    pub async fn process(&self, item: WorkItem) {
        let job_id = item.id;
        let job_name = item.name.clone();

        match self.manager.set_job_started(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                let status = self
                    .manager
                    .get_job(job_id)
                    .map(|record| record.status)
                    .unwrap_or(JobStatus::Cancelled);
                debug!(job_id = %job_id, job_name = %job_name, %status, "skipping job that is no longer pending");
                self.manager.emit(JobEvent::Skipped {
                    job_id,
                    name: job_name,
                    status,
                });
                self.manager.release_job_token(job_id);
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, job_name = %job_name, error = %e, "failed to mark job as started");
                self.finish(job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await;
                return;
            }
        }

        let token = self.manager.job_token(job_id);
        let heartbeat = Heartbeat::start(
            self.manager.clone(),
            job_id,
            self.config.heartbeat_interval,
        );

        let result = match tokio::spawn(item.into_future(token.clone())).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(anyhow!(
                "job panicked: {}",
                panic_message(join_error.into_panic())
            )),
            Err(join_error) => Err(anyhow!("job task aborted: {}", join_error)),
        };

        // The heartbeat must be gone before the terminal write.
        heartbeat.stop().await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, job_name = %job_name, "job succeeded");
                self.finish(job_id, JobStatus::Completed, None).await;
            }
            Err(e) if token.is_cancelled() || JobError::is_cancellation(&e) => {
                debug!(job_id = %job_id, job_name = %job_name, error = %e, "job unwound after cancellation");
                self.finish(job_id, JobStatus::Cancelled, None).await;
            }
            Err(e) => {
                debug!(job_id = %job_id, job_name = %job_name, error = %e, "job returned an error");
                self.finish(job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await;
            }
        }
    }

    async fn finish(&self, job_id: uuid::Uuid, status: JobStatus, error: Option<&str>) {
        match self.manager.set_job_completed(job_id, status, error).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, %status, "job already finalized, outcome discarded")
            }
            Err(e) => {
                error!(job_id = %job_id, %status, error = %e, "failed to record job outcome")
            }
        }
        self.manager.release_job_token(job_id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait::async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        "job-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        self.run_until_cancelled(shutdown).await;
        Ok(())
    }
}
