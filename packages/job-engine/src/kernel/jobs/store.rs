//! Durable persistence for job records.
//!
//! The engine treats the store as an audit and recovery log: it is written on
//! every transition and consulted for deduplication, but never used to
//! coordinate workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::job::{JobRecord, JobUpdate};

/// Trait for job record persistence.
///
/// # Implementer Notes
///
/// - `insert` must reject an id that already exists
/// - `exists_active` answers "is a job with this name pending or running"
/// - `update` applies only the `Some` fields of the partial update and fails
///   when the id is unknown
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: &JobRecord) -> Result<()>;

    /// Whether any record named `name` is Pending or Running.
    async fn exists_active(&self, name: &str) -> Result<bool>;

    /// Apply a partial field update by id.
    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<()>;

    /// Fetch one record.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<JobRecord>>;

    /// Pending and Running records, oldest first.
    async fn list_active(&self) -> Result<Vec<JobRecord>>;
}

/// Thread-safe store handle.
pub type SharedJobStore = Arc<dyn JobStore>;

/// Job store kept in process memory.
///
/// Useful for tests and for deployments that do not need records to survive a
/// restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records, e.g. to simulate a restart.
    pub fn with_records(records: impl IntoIterator<Item = JobRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.id) {
            bail!("job {} already exists", record.id);
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn exists_active(&self, name: &str) -> Result<bool> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|r| r.name == name && r.status.is_active()))
    }

    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(&id) {
            Some(record) => {
                record.apply(update);
                Ok(())
            }
            None => bail!("job {} not found", id),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut records: Vec<JobRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let mut records: Vec<JobRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::JobStatus;
    use chrono::Utc;

    fn record(name: &str) -> JobRecord {
        JobRecord::pending(Uuid::now_v7(), name, Utc::now())
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = InMemoryJobStore::new();
        let record = record("Sync");
        store.insert(&record).await.unwrap();
        assert!(store.insert(&record).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn exists_active_ignores_terminal_records() {
        let store = InMemoryJobStore::new();
        let record = record("Sync");
        store.insert(&record).await.unwrap();
        assert!(store.exists_active("Sync").await.unwrap());
        assert!(!store.exists_active("Other").await.unwrap());

        store
            .update(
                record.id,
                &JobUpdate::completed(JobStatus::Cancelled, Utc::now(), None),
            )
            .await
            .unwrap();
        assert!(!store.exists_active("Sync").await.unwrap());
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let store = InMemoryJobStore::new();
        let result = store
            .update(Uuid::now_v7(), &JobUpdate::started(Utc::now()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_list_active_oldest_first() {
        let first = record("A");
        let second = record("B");
        let store = InMemoryJobStore::with_records([first.clone(), second.clone()]);

        let all = store.list().await.unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        let active = store.list_active().await.unwrap();
        assert_eq!(active[0].id, first.id);
    }
}
