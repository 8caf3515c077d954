//! In-process background job engine.
//!
//! This module provides the job lifecycle infrastructure:
//! - [`JobManager`] - Enqueue/cancel façade, owner of the registry and queue
//! - [`JobWorker`] - Long-running service that executes queued jobs serially
//! - [`JobStore`] - Durable record store ([`InMemoryJobStore`], [`PostgresJobStore`])
//! - [`JobCatalog`] - Named executables for triggers and orphan recovery
//! - [`JobEvent`] - Lifecycle events broadcast to subscribers
//!
//! # Architecture
//!
//! ```text
//! Trigger calls manager.enqueue(name, executable)
//!     │
//!     ├─► exists_active(name)? ──► DuplicateActiveJob
//!     ├─► store.insert(Pending) ─► registry.insert ─► queue.push
//!     └─► JobEvent::Enqueued
//!
//! JobWorker
//!     │
//!     ├─► try_dequeue
//!     ├─► set_job_started + Heartbeat
//!     ├─► executable(job_token)
//!     └─► set_job_completed(Completed | Failed | Cancelled)
//! ```

pub mod error;
pub mod events;
mod catalog;
mod heartbeat;
mod job;
pub mod manager;
#[cfg(feature = "postgres")]
mod postgres_store;
mod queue;
mod registry;
mod store;
pub mod testing;
mod worker;

pub use catalog::JobCatalog;
pub use error::{JobError, Result};
pub use events::JobEvent;
pub use heartbeat::Heartbeat;
pub use job::{timestamp_now, JobRecord, JobStatus, JobUpdate};
pub use manager::{JobManager, ORPHANED_AT_RESTART};
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresJobStore;
pub use queue::{executable, Executable, JobFuture, JobQueue, WorkItem};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use store::{InMemoryJobStore, JobStore, SharedJobStore};
pub use worker::{JobWorker, JobWorkerConfig};
