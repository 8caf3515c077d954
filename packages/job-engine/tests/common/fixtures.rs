//! Record fixtures for restart scenarios.

use chrono::Duration;
use job_engine::kernel::jobs::{timestamp_now, JobRecord, JobStatus, JobUpdate};
use uuid::Uuid;

/// A record the previous process left Pending.
pub fn pending_record(name: &str) -> JobRecord {
    JobRecord::pending(Uuid::now_v7(), name, timestamp_now() - Duration::minutes(10))
}

/// A record the previous process left Running.
pub fn running_record(name: &str) -> JobRecord {
    let mut record = pending_record(name);
    let started_at = record.created_at + Duration::seconds(1);
    record.apply(&JobUpdate::started(started_at));
    record
}

/// A record that finished before the restart.
pub fn finished_record(name: &str, status: JobStatus) -> JobRecord {
    let mut record = running_record(name);
    let completed_at = record.created_at + Duration::seconds(5);
    let error = (status == JobStatus::Failed).then_some("earlier failure");
    record.apply(&JobUpdate::completed(status, completed_at, error));
    record
}
