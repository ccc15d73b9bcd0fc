//! Error types for scheduler operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Interval cannot drive a recurring task
    #[error("Invalid interval for '{job_type}': {interval:?}")]
    InvalidInterval { job_type: String, interval: Duration },

    /// Task not found
    #[error("Scheduled task not found: {0}")]
    TaskNotFound(String),

    /// Called outside a tokio runtime
    #[error("No tokio runtime available: {0}")]
    Runtime(String),
}
