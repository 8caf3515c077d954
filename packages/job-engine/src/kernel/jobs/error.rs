//! Error types for the job engine.

use thiserror::Error;
use uuid::Uuid;

use super::JobStatus;

/// Errors surfaced by the job façade.
///
/// Executables report their own failures through `anyhow::Error`; the worker
/// records those on the job instead of returning them. An executable that
/// unwinds because its cancellation token fired may return
/// [`JobError::Cancelled`] to have the job recorded as cancelled.
#[derive(Error, Debug)]
pub enum JobError {
    /// A job with the same name is already pending or running.
    #[error("a job named {name:?} is already pending or running")]
    DuplicateActiveJob { name: String },

    #[error("job name must not be empty")]
    InvalidName,

    /// `enqueue_named` was called with a name the catalog does not know.
    #[error("no job named {name:?} is registered")]
    UnknownJob { name: String },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job was cancelled")]
    Cancelled,

    /// The durable store rejected a read or write.
    #[error("job store error: {0:#}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        JobError::Store(error)
    }
}

impl JobError {
    /// Conflicts are not retryable; callers should report them as such.
    pub fn is_conflict(&self) -> bool {
        matches!(self, JobError::DuplicateActiveJob { .. })
    }

    /// Whether an executable's error means it unwound on cancellation.
    pub fn is_cancellation(error: &anyhow::Error) -> bool {
        matches!(error.downcast_ref::<JobError>(), Some(JobError::Cancelled))
    }
}

/// Result type alias using JobError.
pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn duplicate_is_a_conflict() {
        let err = JobError::DuplicateActiveJob {
            name: "Sync".to_string(),
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "a job named \"Sync\" is already pending or running"
        );
    }

    #[test]
    fn store_error_is_not_a_conflict() {
        let err = JobError::from(anyhow::anyhow!("connection refused"));
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "job store error: connection refused");
    }

    #[test]
    fn cancellation_is_detected_through_context() {
        let err = Err::<(), _>(JobError::Cancelled)
            .context("rebuilding relationship graph")
            .unwrap_err();
        assert!(JobError::is_cancellation(&err));
        assert!(!JobError::is_cancellation(&anyhow::anyhow!("boom")));
    }

    #[test]
    fn invalid_transition_display() {
        let id = Uuid::nil();
        let err = JobError::InvalidTransition {
            id,
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            format!("job {id} cannot move from completed to running")
        );
    }
}
