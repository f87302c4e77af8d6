//! Record store interface.

use async_trait::async_trait;

use vguard_models::{JobId, JobRecord};

use crate::error::StoreResult;
use crate::update::RecordUpdate;

/// Durable key-value store of job records keyed by job ID.
///
/// Implementations must guarantee read-after-write consistency for a single
/// record and must never interleave two `atomic_update` calls for the same
/// job ID. Cross-record transactions are not required.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the ID is taken.
    async fn create(&self, record: JobRecord) -> StoreResult<()>;

    /// Fetch a record by ID.
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// Apply `update` to one record atomically and return the new record.
    async fn atomic_update(&self, job_id: &JobId, update: RecordUpdate) -> StoreResult<JobRecord>;

    /// All records that have not reached a terminal state.
    async fn list_unfinished(&self) -> StoreResult<Vec<JobRecord>>;
}
