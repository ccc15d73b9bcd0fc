//! Durable mirror contract for crash recovery.

use crate::error::StoreError;
use crate::job::{Job, JobId, JobRow, JobRowStatus};
use async_trait::async_trait;

/// Durable storage for job rows.
///
/// The queue never reads from the store once recovery has loaded it, and it
/// never lets a store failure affect in-memory scheduling.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All rows in `pending` status, optionally restricted to one job type.
    async fn find_pending(&self, job_type: Option<&str>) -> Result<Vec<JobRow>, StoreError>;

    /// Persist a newly enqueued job as a pending row.
    async fn create_row(&self, job: &Job) -> Result<(), StoreError>;

    /// Update a row's status, and its attempt count when given.
    async fn update_status(
        &self,
        id: JobId,
        status: JobRowStatus,
        attempts: Option<u32>,
    ) -> Result<(), StoreError>;

    /// Flip every `running` row back to `pending`, returning the rows flipped.
    async fn reset_running(&self) -> Result<Vec<JobRow>, StoreError>;
}
