//! In-process record store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use vguard_models::{JobId, JobRecord};

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::metrics::record_operation;
use crate::store::RecordStore;
use crate::update::RecordUpdate;

/// Record store backed by a map behind a lock.
///
/// Updates run under the write lock, which makes every `atomic_update`
/// atomic with respect to all other operations.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRecordStore {
    /// Create a store that stamps records with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: JobRecord) -> StoreResult<()> {
        let started = Instant::now();
        let result = {
            let mut records = self.records.write().await;
            if records.contains_key(&record.id) {
                Err(StoreError::AlreadyExists(record.id.clone()))
            } else {
                debug!(job_id = %record.id, "Created job record");
                records.insert(record.id.clone(), record);
                Ok(())
            }
        };
        record_operation("create", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let started = Instant::now();
        let record = self.records.read().await.get(job_id).cloned();
        record_operation("get", true, started.elapsed().as_secs_f64());
        Ok(record)
    }

    async fn atomic_update(&self, job_id: &JobId, update: RecordUpdate) -> StoreResult<JobRecord> {
        let started = Instant::now();
        let result = {
            let mut records = self.records.write().await;
            match records.get_mut(job_id) {
                Some(record) => update
                    .apply(record, self.clock.now())
                    .map(|()| record.clone()),
                None => Err(StoreError::NotFound(job_id.clone())),
            }
        };
        if result.is_ok() {
            debug!(job_id = %job_id, fields = ?update.field_paths(), "Updated job record");
        }
        record_operation("atomic_update", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<JobRecord>> {
        let started = Instant::now();
        let mut unfinished: Vec<JobRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| !record.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        record_operation("list_unfinished", true, started.elapsed().as_secs_f64());
        Ok(unfinished)
    }
}
