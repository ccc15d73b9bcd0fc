//! Interval scheduler.

use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use conveyor_queue::{EnqueueOptions, JobQueue};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Scheduled task identifier.
pub type TaskId = Uuid;

/// Snapshot of a recurring task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTaskInfo {
    pub id: TaskId,
    pub job_type: String,
    pub interval: Duration,
    pub tick_count: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TaskState {
    active: AtomicBool,
    ticks: AtomicU64,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

struct ScheduledTask {
    id: TaskId,
    job_type: String,
    interval: Duration,
    state: Arc<TaskState>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn info(&self) -> ScheduledTaskInfo {
        ScheduledTaskInfo {
            id: self.id,
            job_type: self.job_type.clone(),
            interval: self.interval,
            tick_count: self.state.ticks.load(Ordering::SeqCst),
            last_tick: *self.state.last_tick.lock(),
        }
    }

    fn deactivate(&self) {
        self.state.active.store(false, Ordering::SeqCst);
        self.handle.abort();
    }
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, ScheduledTask>,
    by_key: HashMap<(String, Duration), TaskId>,
}

/// Issues tick jobs into a [`JobQueue`] at fixed intervals.
///
/// The first tick fires one full interval after registration, and each
/// following tick is armed after the previous one was enqueued, so ticks
/// drift under load rather than bunching up. Dropping the scheduler cancels
/// every task.
pub struct Scheduler {
    queue: JobQueue,
    registry: Mutex<Registry>,
}

impl Scheduler {
    /// Create a scheduler feeding `queue`.
    pub fn new(queue: JobQueue) -> Self {
        info!("Initializing interval scheduler");
        Self {
            queue,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Issue a `job_type` job with an empty payload every `interval`.
    ///
    /// Idempotent per `(job_type, interval)`: scheduling the same pair again
    /// returns the id of the task already running.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use conveyor_queue::{JobQueue, QueueConfig};
    /// use conveyor_scheduler::*;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), SchedulerError> {
    /// let scheduler = Scheduler::new(JobQueue::new(QueueConfig::default()));
    ///
    /// let id = scheduler.schedule("retention.sweep", Duration::from_secs(3600))?;
    /// assert_eq!(scheduler.schedule("retention.sweep", Duration::from_secs(3600))?, id);
    /// # Ok(())
    /// # }
    /// ```
    pub fn schedule(&self, job_type: impl Into<String>, interval: Duration) -> SchedulerResult<TaskId> {
        let job_type = job_type.into();
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval { job_type, interval });
        }

        let runtime = Handle::try_current().map_err(|e| SchedulerError::Runtime(e.to_string()))?;

        let mut registry = self.registry.lock();
        let key = (job_type.clone(), interval);
        if let Some(id) = registry.by_key.get(&key) {
            debug!(task_id = %id, job_type = %job_type, "Task already scheduled");
            return Ok(*id);
        }

        let id = Uuid::new_v4();
        let state = Arc::new(TaskState::default());
        state.active.store(true, Ordering::SeqCst);

        let handle = runtime.spawn(tick_loop(
            self.queue.clone(),
            job_type.clone(),
            interval,
            Arc::clone(&state),
        ));

        info!(
            task_id = %id,
            job_type = %job_type,
            interval_ms = interval.as_millis() as u64,
            "Scheduled recurring task"
        );

        registry.by_key.insert(key, id);
        registry.tasks.insert(
            id,
            ScheduledTask {
                id,
                job_type,
                interval,
                state,
                handle,
            },
        );

        Ok(id)
    }

    /// Stop a task. Returns `false` when the id is unknown or already cancelled.
    ///
    /// Jobs enqueued by earlier ticks stay in the queue.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut registry = self.registry.lock();
        let Some(task) = registry.tasks.remove(&id) else {
            return false;
        };

        registry.by_key.remove(&(task.job_type.clone(), task.interval));
        task.deactivate();
        info!(task_id = %id, job_type = %task.job_type, "Cancelled recurring task");
        true
    }

    /// Stop every task. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut registry = self.registry.lock();
        registry.by_key.clear();
        let count = registry.tasks.len();
        for (_, task) in registry.tasks.drain() {
            task.deactivate();
        }
        if count > 0 {
            info!(count, "Cancelled all recurring tasks");
        }
        count
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> SchedulerResult<ScheduledTaskInfo> {
        self.registry
            .lock()
            .tasks
            .get(&id)
            .map(ScheduledTask::info)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))
    }

    /// Active tasks, ordered by job type then interval.
    pub fn tasks(&self) -> Vec<ScheduledTaskInfo> {
        let mut tasks: Vec<ScheduledTaskInfo> = self
            .registry
            .lock()
            .tasks
            .values()
            .map(ScheduledTask::info)
            .collect();
        tasks.sort_by(|a, b| (&a.job_type, a.interval).cmp(&(&b.job_type, b.interval)));
        tasks
    }

    /// The queue ticks are issued into.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, task) in self.registry.get_mut().tasks.drain() {
            task.deactivate();
        }
    }
}

async fn tick_loop(queue: JobQueue, job_type: String, interval: Duration, state: Arc<TaskState>) {
    loop {
        tokio::time::sleep(interval).await;

        // Cancellation may have raced the timer.
        if !state.active.load(Ordering::SeqCst) {
            break;
        }

        let job = queue
            .enqueue_with(&job_type, serde_json::json!({}), EnqueueOptions::new())
            .await;

        let tick = state.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        *state.last_tick.lock() = Some(job.enqueued_at);
        debug!(job_type = %job_type, job_id = %job.id, tick, "Issued scheduled tick");
    }
}
