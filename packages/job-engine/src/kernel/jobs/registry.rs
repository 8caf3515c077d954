//! In-memory registry of job records.
//!
//! The registry is the authoritative view for status queries. It is owned by
//! the [`JobManager`](super::JobManager) and only mutated after the matching
//! store write has succeeded, so it never shows a state the store rejected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::job::{JobRecord, JobUpdate};

/// Mapping of job id to its latest record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: JobRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record);
    }

    /// Insert a record only if the id is not tracked yet.
    ///
    /// Returns `true` when the record was added.
    pub fn insert_if_absent(&self, record: JobRecord) -> bool {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.id) {
            return false;
        }
        records.insert(record.id, record);
        true
    }

    pub fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Merge `update` into the record and return the result.
    pub fn apply(&self, id: Uuid, update: &JobUpdate) -> Option<JobRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.get_mut(&id)?;
        record.apply(update);
        Some(record.clone())
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;
