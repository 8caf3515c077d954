//! Job record model and lifecycle state machine.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "job_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses that block another job with the same name from being enqueued.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Running -> Running` is the heartbeat self-transition. `Pending -> Failed`
    /// is only taken when orphaned records are reconciled at startup.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time at the microsecond precision `TIMESTAMPTZ` stores, so
/// in-memory records compare equal to what a store reads back.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================================================
// Partial update
// ============================================================================

/// A partial field update for a [`JobRecord`].
///
/// `None` leaves the field untouched. Stores apply these by id without reading
/// the record first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    /// Worker picked the job up.
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            started_at: Some(now),
            last_updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Generic status write, also used for heartbeats.
    pub fn status(status: JobStatus, now: DateTime<Utc>, error: Option<&str>) -> Self {
        Self {
            status: Some(status),
            last_updated_at: Some(now),
            error_message: error.map(str::to_string),
            ..Default::default()
        }
    }

    /// Terminal write.
    pub fn completed(status: JobStatus, now: DateTime<Utc>, error: Option<&str>) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(now),
            last_updated_at: Some(now),
            error_message: error.map(str::to_string),
            ..Default::default()
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Durable, queryable lifecycle state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// A freshly enqueued record.
    pub fn pending(id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_updated_at: now,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `update` is a legal step from the current state.
    ///
    /// Terminal records accept nothing. `started_at` is set exactly on the
    /// Pending -> Running step and never again, and a terminal status and
    /// `completed_at` always travel together.
    pub fn admits(&self, update: &JobUpdate) -> bool {
        if self.is_terminal() {
            return false;
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return false;
            }
        }

        let starting =
            self.status == JobStatus::Pending && update.status == Some(JobStatus::Running);
        if starting != update.started_at.is_some() {
            return false;
        }
        if starting && self.started_at.is_some() {
            return false;
        }

        let terminal_status = update.status.is_some_and(|s| s.is_terminal());
        terminal_status == update.completed_at.is_some()
    }

    /// Merge a partial update into this record.
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(started_at) = update.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(last_updated_at) = update.last_updated_at {
            self.last_updated_at = last_updated_at.max(self.created_at);
        }
        if let Some(error) = &update.error_message {
            self.error_message = Some(error.clone());
        }
    }

    /// Wall-clock run time, once both ends are known.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as u64)
    }
}
