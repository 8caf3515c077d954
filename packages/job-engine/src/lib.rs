// Job Engine - in-process background job orchestration
//
// Runs named units of work one at a time in FIFO order, tracks each job's
// lifecycle in an in-memory registry mirrored to a durable store, keeps
// running jobs alive with heartbeats, and lets callers cancel them.
//
// The engine lives in kernel/jobs; kernel/service_host runs the worker as a
// long-lived service.

pub mod config;
pub mod kernel;

pub use config::*;
pub use kernel::jobs::{
    JobCatalog, JobError, JobEvent, JobManager, JobRecord, JobStatus, JobWorker,
    JobWorkerConfig,
};
