use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobStatus;

/// Job lifecycle events.
///
/// These events represent facts about the job lifecycle, not commands.
/// They are broadcast by the `JobManager` after the corresponding write has
/// reached both the store and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job was accepted and queued.
    Enqueued { job_id: Uuid, name: String },

    /// The worker picked the job up.
    Started { job_id: Uuid, name: String },

    /// A running job's liveness timestamp advanced.
    Heartbeat { job_id: Uuid },

    /// Job completed successfully.
    Completed {
        job_id: Uuid,
        name: String,
        duration_ms: u64,
    },

    /// Job execution failed.
    Failed {
        job_id: Uuid,
        name: String,
        error: String,
    },

    /// Job was cancelled, either on request or because it unwound on shutdown.
    Cancelled { job_id: Uuid, name: String },

    /// The worker dequeued a job whose record was no longer pending.
    Skipped {
        job_id: Uuid,
        name: String,
        status: JobStatus,
    },

    /// An active record without a queued work item was found at startup.
    Orphaned {
        job_id: Uuid,
        name: String,
        requeued: bool,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Enqueued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Heartbeat { job_id }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id, .. }
            | JobEvent::Skipped { job_id, .. }
            | JobEvent::Orphaned { job_id, .. } => *job_id,
        }
    }

    /// Whether this event records a terminal transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}
