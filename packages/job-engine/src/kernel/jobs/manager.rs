//! Job manager: the enqueue/cancel façade.
//!
//! `JobManager` owns the registry and the queue, and writes through to the
//! durable store. Every state change goes through one transition lock that
//! validates the state machine, writes the store, then commits the registry.
//! Heartbeats, the worker's terminal write and cancellation requests can
//! therefore never interleave on the same record.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::JobCatalog;
use super::error::{JobError, Result};
use super::events::JobEvent;
use super::job::{timestamp_now, JobRecord, JobStatus, JobUpdate};
use super::queue::{executable, Executable, JobQueue, WorkItem};
use super::registry::{JobRegistry, SharedJobRegistry};
use super::store::SharedJobStore;
use crate::config::OrphanPolicy;

/// Error message recorded on jobs that were active when the process died.
pub const ORPHANED_AT_RESTART: &str = "orphaned at restart";

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Public contract for enqueueing, cancelling and querying jobs.
///
/// # Example
///
/// ```ignore
/// let manager = Arc::new(JobManager::new(Arc::new(InMemoryJobStore::new())));
///
/// let id = manager
///     .enqueue("PopulateDatabase", |token| async move { import::run(token).await })
///     .await?;
///
/// manager.try_cancel(id).await?;
/// ```
pub struct JobManager {
    store: SharedJobStore,
    registry: SharedJobRegistry,
    queue: Arc<JobQueue>,
    catalog: Arc<JobCatalog>,
    events: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
    job_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    transition_lock: AsyncMutex<()>,
}

impl JobManager {
    /// Create a manager over `store` with an empty catalog and its own
    /// shutdown token.
    pub fn new(store: SharedJobStore) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);

        Self {
            store,
            registry: Arc::new(JobRegistry::new()),
            queue: Arc::new(JobQueue::new()),
            catalog: Arc::new(JobCatalog::new()),
            events,
            shutdown: CancellationToken::new(),
            job_tokens: Mutex::new(HashMap::new()),
            transition_lock: AsyncMutex::new(()),
        }
    }

    /// Use `catalog` for [`enqueue_named`](Self::enqueue_named) and orphan
    /// recovery.
    pub fn with_catalog(mut self, catalog: JobCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Derive every job's cancellation token from the process-wide `shutdown`
    /// token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    pub fn store(&self) -> &SharedJobStore {
        &self.store
    }

    pub fn registry(&self) -> &SharedJobRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Enqueue `executable` under the logical `name`.
    ///
    /// Fails with [`JobError::DuplicateActiveJob`] when a job with the same
    /// name is pending or running.
    pub async fn enqueue<F, Fut>(&self, name: &str, executable_fn: F) -> Result<Uuid>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.enqueue_executable(name, executable(executable_fn))
            .await
    }

    /// Enqueue the catalog's executable for `name`.
    pub async fn enqueue_named(&self, name: &str) -> Result<Uuid> {
        let executable = self
            .catalog
            .executable(name)
            .ok_or_else(|| JobError::UnknownJob {
                name: name.to_string(),
            })?;

        self.enqueue_executable(name, executable).await
    }

    async fn enqueue_executable(&self, name: &str, executable: Executable) -> Result<Uuid> {
        if name.trim().is_empty() {
            return Err(JobError::InvalidName);
        }

        let record = {
            let _guard = self.transition_lock.lock().await;

            if self.store.exists_active(name).await? {
                warn!(job_name = %name, "rejecting duplicate active job");
                return Err(JobError::DuplicateActiveJob {
                    name: name.to_string(),
                });
            }

            let record = JobRecord::pending(Uuid::now_v7(), name, timestamp_now());
            self.store.insert(&record).await?;
            self.registry.insert(record.clone());
            self.track(record.id);
            self.queue
                .push(WorkItem::new(record.id, record.name.clone(), executable));
            self.emit(JobEvent::Enqueued {
                job_id: record.id,
                name: record.name.clone(),
            });
            record
        };

        info!(job_id = %record.id, job_name = %record.name, "job enqueued");
        Ok(record.id)
    }

    /// Non-blocking pop from the queue head. Used by the worker.
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        self.queue.try_dequeue()
    }

    /// Cancel a pending or running job.
    ///
    /// Marks the record cancelled and fires the job's cancellation token.
    /// Returns `false` without touching anything when the job is unknown or
    /// already finished. A running executable that ignores its token keeps
    /// running, but its outcome no longer changes the record.
    pub async fn try_cancel(&self, id: Uuid) -> Result<bool> {
        let update = JobUpdate::completed(JobStatus::Cancelled, timestamp_now(), None);
        let write = self.write(id, update, None, terminal_event).await;
        if applied(write)?.is_none() {
            return Ok(false);
        }

        if let Some(token) = self.job_tokens.lock().unwrap_or_else(|e| e.into_inner()).get(&id) {
            token.cancel();
        }
        Ok(true)
    }

    // ========================================================================
    // Status writers
    // ========================================================================

    /// Pending -> Running. No-op for unknown ids and records that are not
    /// pending.
    pub async fn set_job_started(&self, id: Uuid) -> Result<bool> {
        let update = JobUpdate::started(timestamp_now());
        let write = self
            .write(id, update, Some(JobStatus::Pending), |record| {
                info!(job_id = %record.id, job_name = %record.name, "job started");
                Some(JobEvent::Started {
                    job_id: record.id,
                    name: record.name.clone(),
                })
            })
            .await;
        Ok(applied(write)?.is_some())
    }

    /// Generic status write; sets `last_updated_at` and, when given, the
    /// error message. Terminal statuses are routed through
    /// [`set_job_completed`](Self::set_job_completed) so `completed_at` is
    /// always recorded with them. A Pending job only becomes Running through
    /// [`set_job_started`](Self::set_job_started); asking for it here is
    /// refused.
    pub async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        if status.is_terminal() {
            return self.set_job_completed(id, status, error).await;
        }

        let update = JobUpdate::status(status, timestamp_now(), error);
        let write = self.write(id, update, None, |_| None).await;
        Ok(applied(write)?.is_some())
    }

    /// Terminal write. The first terminal write wins; later ones are no-ops.
    pub async fn set_job_completed(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let update = JobUpdate::completed(status, timestamp_now(), error);
        let write = self.write(id, update, None, terminal_event).await;
        Ok(applied(write)?.is_some())
    }

    /// Advance `last_updated_at` of a running job.
    ///
    /// Returns `false` once the record has left Running, which tells the
    /// heartbeat ticker to stop.
    pub async fn heartbeat(&self, id: Uuid) -> Result<bool> {
        let update = JobUpdate::status(JobStatus::Running, timestamp_now(), None);
        let write = self
            .write(id, update, Some(JobStatus::Running), |record| {
                Some(JobEvent::Heartbeat { job_id: record.id })
            })
            .await;
        Ok(applied(write)?.is_some())
    }

    /// Validate, persist, then commit one update.
    ///
    /// The event built by `event` is published before the lock is released,
    /// so subscribers see events in the order the writes committed.
    async fn write<E>(
        &self,
        id: Uuid,
        update: JobUpdate,
        expected: Option<JobStatus>,
        event: E,
    ) -> Result<JobRecord>
    where
        E: FnOnce(&JobRecord) -> Option<JobEvent>,
    {
        let _guard = self.transition_lock.lock().await;

        let current = self.registry.get(id).ok_or(JobError::NotFound(id))?;
        let expected_ok = expected.map_or(true, |status| current.status == status);
        if !expected_ok || !current.admits(&update) {
            return Err(JobError::InvalidTransition {
                id,
                from: current.status,
                to: update.status.unwrap_or(current.status),
            });
        }

        self.store.update(id, &update).await?;
        let record = self
            .registry
            .apply(id, &update)
            .ok_or(JobError::NotFound(id))?;

        if let Some(event) = event(&record) {
            self.emit(event);
        }
        Ok(record)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All known records, newest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.registry.list()
    }

    pub fn get_job(&self, id: Uuid) -> Option<JobRecord> {
        self.registry.get(id)
    }

    /// Number of work items waiting in the queue.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Subscribe to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Cancellation scopes
    // ========================================================================

    /// The cancellation token handed to the job's executable.
    pub fn job_token(&self, id: Uuid) -> CancellationToken {
        self.track(id)
    }

    /// Forget the job's token once the worker is done with it.
    pub fn release_job_token(&self, id: Uuid) {
        self.job_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn track(&self, id: Uuid) -> CancellationToken {
        self.job_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_insert_with(|| self.shutdown.child_token())
            .clone()
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Copy records from the store that the registry does not know yet.
    pub async fn load_history(&self) -> Result<usize> {
        let records = self.store.list().await?;
        let loaded = records
            .into_iter()
            .filter(|record| self.registry.insert_if_absent(record.clone()))
            .count();

        debug!(count = loaded, "loaded job history from store");
        Ok(loaded)
    }

    /// Reconcile records left Pending or Running by a previous process.
    ///
    /// Call before the worker starts. Each active record without a queued
    /// work item is handled per `policy`:
    /// - `MarkFailed`: recorded as failed with [`ORPHANED_AT_RESTART`]
    /// - `Requeue`: pending records whose name is in the catalog are queued
    ///   again under the same id; running ones are marked failed and a fresh
    ///   job with the same name is enqueued. Names the catalog does not know
    ///   fall back to `MarkFailed`.
    ///
    /// Returns the number of orphans handled.
    pub async fn recover_orphans(&self, policy: OrphanPolicy) -> Result<usize> {
        self.load_history().await?;

        let mut recovered = 0;
        for record in self.store.list_active().await? {
            if self.queue.contains(record.id) {
                continue;
            }

            let executable = match policy {
                OrphanPolicy::Requeue => self.catalog.executable(&record.name),
                OrphanPolicy::MarkFailed => None,
            };

            match (executable, record.status) {
                (Some(executable), JobStatus::Pending) => {
                    warn!(job_id = %record.id, job_name = %record.name, "requeueing orphaned pending job");
                    self.track(record.id);
                    self.queue
                        .push(WorkItem::new(record.id, record.name.clone(), executable));
                    self.emit(JobEvent::Orphaned {
                        job_id: record.id,
                        name: record.name.clone(),
                        requeued: true,
                    });
                }
                (Some(_), _) => {
                    warn!(job_id = %record.id, job_name = %record.name, "restarting orphaned running job");
                    self.fail_orphan(&record, true).await?;
                    match self.enqueue_named(&record.name).await {
                        Ok(job_id) => {
                            info!(job_id = %job_id, orphan_id = %record.id, "enqueued replacement for orphaned job")
                        }
                        Err(e) if e.is_conflict() => {
                            warn!(job_name = %record.name, "replacement skipped; a job with this name is already active")
                        }
                        Err(e) => return Err(e),
                    }
                }
                (None, _) => {
                    warn!(job_id = %record.id, job_name = %record.name, status = %record.status, "marking orphaned job failed");
                    self.fail_orphan(&record, false).await?;
                }
            }

            recovered += 1;
        }

        if recovered > 0 {
            info!(count = recovered, ?policy, "recovered orphaned jobs");
        }
        Ok(recovered)
    }

    async fn fail_orphan(&self, record: &JobRecord, requeued: bool) -> Result<()> {
        self.emit(JobEvent::Orphaned {
            job_id: record.id,
            name: record.name.clone(),
            requeued,
        });
        self.set_job_completed(record.id, JobStatus::Failed, Some(ORPHANED_AT_RESTART))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub(crate) fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Log a terminal record and build its event.
fn terminal_event(record: &JobRecord) -> Option<JobEvent> {
    match record.status {
        JobStatus::Completed => {
            info!(job_id = %record.id, job_name = %record.name, "job completed");
            Some(JobEvent::Completed {
                job_id: record.id,
                name: record.name.clone(),
                duration_ms: record.duration_ms().unwrap_or(0),
            })
        }
        JobStatus::Failed => {
            let error = record.error_message.clone().unwrap_or_default();
            warn!(job_id = %record.id, job_name = %record.name, error = %error, "job failed");
            Some(JobEvent::Failed {
                job_id: record.id,
                name: record.name.clone(),
                error,
            })
        }
        JobStatus::Cancelled => {
            info!(job_id = %record.id, job_name = %record.name, "job cancelled");
            Some(JobEvent::Cancelled {
                job_id: record.id,
                name: record.name.clone(),
            })
        }
        JobStatus::Pending | JobStatus::Running => None,
    }
}

/// Map "unknown job" and "not allowed from here" to `None`; keep store errors.
fn applied(result: Result<JobRecord>) -> Result<Option<JobRecord>> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(JobError::NotFound(id)) => {
            debug!(job_id = %id, "ignoring update for unknown job");
            Ok(None)
        }
        Err(JobError::InvalidTransition { id, from, to }) => {
            debug!(job_id = %id, %from, %to, "ignoring update not allowed from current state");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
