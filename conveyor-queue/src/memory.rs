//! In-memory [`JobStore`], for tests and single-process development setups.

use crate::error::StoreError;
use crate::job::{Job, JobId, JobRow, JobRowStatus};
use crate::store::JobStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Job rows held in a map. Can be told to fail every call.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: Mutex<HashMap<JobId, JobRow>>,
    failing: AtomicBool,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed a row directly, e.g. to simulate a previous process.
    pub fn insert_row(&self, row: JobRow) {
        self.rows.lock().insert(row.id, row);
    }

    /// Get a row by id.
    pub fn row(&self, id: JobId) -> Option<JobRow> {
        self.rows.lock().get(&id).cloned()
    }

    /// All rows, ordered by enqueue time.
    pub fn rows(&self) -> Vec<JobRow> {
        let mut rows: Vec<JobRow> = self.rows.lock().values().cloned().collect();
        rows.sort_by_key(|row| (row.enqueued_at, row.id));
        rows
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_pending(&self, job_type: Option<&str>) -> Result<Vec<JobRow>, StoreError> {
        self.check()?;
        Ok(self
            .rows()
            .into_iter()
            .filter(|row| row.status == JobRowStatus::Pending)
            .filter(|row| job_type.is_none_or(|t| row.job_type == t))
            .collect())
    }

    async fn create_row(&self, job: &Job) -> Result<(), StoreError> {
        self.check()?;
        self.insert_row(JobRow::pending(job));
        Ok(())
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobRowStatus,
        attempts: Option<u32>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.status = status;
        if let Some(attempts) = attempts {
            row.attempts = attempts;
        }
        Ok(())
    }

    async fn reset_running(&self) -> Result<Vec<JobRow>, StoreError> {
        self.check()?;
        let mut rows = self.rows.lock();
        let mut reset = Vec::new();
        for row in rows.values_mut() {
            if row.status == JobRowStatus::Running {
                row.status = JobRowStatus::Pending;
                reset.push(row.clone());
            }
        }
        reset.sort_by_key(|row| (row.enqueued_at, row.id));
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_find_pending() {
        let store = MemoryJobStore::new();
        let email = Job::new("email", json!({}));
        let report = Job::new("report", json!({}));
        store.create_row(&email).await.unwrap();
        store.create_row(&report).await.unwrap();

        assert_eq!(store.find_pending(None).await.unwrap().len(), 2);
        let only_email = store.find_pending(Some("email")).await.unwrap();
        assert_eq!(only_email.len(), 1);
        assert_eq!(only_email[0].id, email.id);
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemoryJobStore::new();
        let job = Job::new("email", json!({}));
        store.create_row(&job).await.unwrap();

        store
            .update_status(job.id, JobRowStatus::Running, Some(1))
            .await
            .unwrap();
        let row = store.row(job.id).unwrap();
        assert_eq!(row.status, JobRowStatus::Running);
        assert_eq!(row.attempts, 1);
        assert!(store.find_pending(None).await.unwrap().is_empty());

        let missing = store
            .update_status(JobId::nil(), JobRowStatus::Completed, None)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_running() {
        let store = MemoryJobStore::new();
        let job = Job::new("email", json!({}));
        store.create_row(&job).await.unwrap();
        store
            .update_status(job.id, JobRowStatus::Running, Some(1))
            .await
            .unwrap();

        let reset = store.reset_running().await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].status, JobRowStatus::Pending);
        assert_eq!(store.row(job.id).unwrap().status, JobRowStatus::Pending);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryJobStore::new();
        store.set_failing(true);
        assert!(store.create_row(&Job::new("x", json!({}))).await.is_err());
        assert!(store.find_pending(None).await.is_err());

        store.set_failing(false);
        assert!(store.find_pending(None).await.is_ok());
    }
}
