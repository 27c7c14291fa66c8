use std::collections::HashMap;
use std::sync::RwLock;

use homeflow_core::BatchId;

use super::StoreError;
use crate::batch::{BatchRecord, BatchStatus};

/// Permanent audit trail of batch runs.
pub trait BatchStore: Send + Sync {
    fn insert(&self, record: &BatchRecord) -> Result<(), StoreError>;

    fn update(&self, record: &BatchRecord) -> Result<(), StoreError>;

    fn get(&self, batch_id: BatchId) -> Result<Option<BatchRecord>, StoreError>;

    /// All records, oldest first.
    fn list(&self) -> Result<Vec<BatchRecord>, StoreError>;

    fn count_by_status(&self, status: BatchStatus) -> Result<usize, StoreError> {
        Ok(self.list()?.iter().filter(|r| r.status == status).count())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    records: RwLock<HashMap<BatchId, BatchRecord>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for InMemoryBatchStore {
    fn insert(&self, record: &BatchRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.contains_key(&record.batch_id) {
            return Err(StoreError::AlreadyExists(record.batch_id.to_string()));
        }
        records.insert(record.batch_id, record.clone());
        Ok(())
    }

    fn update(&self, record: &BatchRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        match records.get_mut(&record.batch_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.batch_id.to_string())),
        }
    }

    fn get(&self, batch_id: BatchId) -> Result<Option<BatchRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&batch_id).cloned())
    }

    fn list(&self) -> Result<Vec<BatchRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<BatchRecord> = records.values().cloned().collect();
        out.sort_by_key(|r| (r.start_time, r.batch_id));
        Ok(out)
    }
}
