//! Job definition and durable row mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Job data payload.
pub type JobData = serde_json::Value;

/// Default number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A unit of work owned by the queue.
///
/// Handlers receive a copy of the job; `attempts` already counts the
/// execution in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier (time-ordered)
    pub id: JobId,

    /// Job type, used to look up the handler
    pub job_type: String,

    /// Job payload data
    pub payload: JobData,

    /// Number of executions started so far
    pub attempts: u32,

    /// Maximum number of executions
    pub max_attempts: u32,

    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,

    /// When the job becomes ready (None means ready now)
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job that is ready immediately.
    pub fn new(job_type: impl Into<String>, payload: JobData) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: job_type.into(),
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
            scheduled_for: None,
        }
    }

    /// Set max attempts (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Schedule the job for a specific time.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(time);
        self
    }

    /// Schedule the job after a delay. A zero delay leaves it ready now.
    pub fn schedule_after(mut self, delay: Duration) -> Self {
        if !delay.is_zero() {
            let at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| self.enqueued_at.checked_add_signed(delay));
            self.scheduled_for = Some(at.unwrap_or(DateTime::<Utc>::MAX_UTC));
        }
        self
    }

    /// Time from which the job may run; the dispatch ordering key.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.scheduled_for.unwrap_or(self.enqueued_at)
    }

    /// Check if the job is ready at `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Check if the job is ready to be processed.
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Whether a failed execution may be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Rebuild a job from its durable row.
    ///
    /// A row that already used every attempt (the process died during the
    /// last one) gets exactly one more execution.
    pub fn from_row(row: JobRow) -> Self {
        let max_attempts = row.max_attempts.max(1);
        Self {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            attempts: row.attempts.min(max_attempts - 1),
            max_attempts,
            enqueued_at: row.enqueued_at,
            scheduled_for: row.scheduled_for,
        }
    }
}

/// Status of a durable job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRowStatus {
    /// Waiting to run
    Pending,
    /// Handler executing
    Running,
    /// Finished successfully
    Completed,
    /// Used every attempt
    Failed,
}

impl JobRowStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobRowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable copy of a job, used for crash recovery only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub id: JobId,
    pub job_type: String,
    pub payload: JobData,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: JobRowStatus,
}

impl JobRow {
    /// A fresh pending row for a newly enqueued job.
    pub fn pending(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            enqueued_at: job.enqueued_at,
            scheduled_for: job.scheduled_for,
            status: JobRowStatus::Pending,
        }
    }
}
