//! In-memory job queue with delayed dispatch and bounded concurrency.

use crate::error::{QueueError, QueueResult};
use crate::events::{Observers, QueueEvent, QueueEventKind, QueueObserver};
use crate::job::{DEFAULT_MAX_ATTEMPTS, Job, JobData, JobId, JobRowStatus};
use crate::metrics::{NoopMetrics, QueueMetrics};
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Job handler function type.
pub type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, QueueResult<()>> + Send + Sync>;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of handler invocations in flight
    pub concurrency: usize,

    /// Attempts given to jobs enqueued without an explicit budget
    pub default_max_attempts: u32,

    /// How often the age sampler reports the oldest pending job
    pub age_sample_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            age_sample_interval: Duration::from_secs(15),
        }
    }
}

impl QueueConfig {
    /// Set the concurrency limit (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the default attempt budget (at least one).
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Set the oldest-pending-age sampling interval.
    pub fn with_age_sample_interval(mut self, interval: Duration) -> Self {
        self.age_sample_interval = interval;
        self
    }
}

/// Per-job options for [`JobQueue::enqueue_with`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Attempt budget; the queue default when `None`
    pub max_attempts: Option<u32>,

    /// Delay before the job becomes ready
    pub delay: Duration,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting in the pending set
    pub queued: usize,
    /// Handler invocations in flight
    pub running: usize,
    /// Registered job types, sorted
    pub handlers: Vec<String>,
    /// Concurrency limit
    pub concurrency: usize,
    /// Whether dispatch is paused
    pub paused: bool,
}

struct Queued {
    seq: u64,
    job: Job,
}

impl Queued {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.job.ready_at(), self.seq)
    }
}

struct WakeUp {
    id: u64,
    at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Queued>,
    running: usize,
    paused: bool,
    wake: Option<WakeUp>,
    next_seq: u64,
    next_wake_id: u64,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    handlers: RwLock<HashMap<String, JobHandler>>,
    observers: Observers,
    store: Option<Arc<dyn JobStore>>,
    metrics: Arc<dyn QueueMetrics>,
}

/// Builder for [`JobQueue`].
pub struct JobQueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn JobStore>>,
    metrics: Arc<dyn QueueMetrics>,
}

impl JobQueueBuilder {
    /// Use the given configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the concurrency limit.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config = self.config.with_concurrency(concurrency);
        self
    }

    /// Mirror job state into a durable store (durable mode).
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report events and sampled ages into a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn QueueMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> JobQueue {
        info!(
            concurrency = self.config.concurrency,
            durable = self.store.is_some(),
            "Initializing job queue"
        );

        JobQueue {
            inner: Arc::new(Inner {
                config: self.config,
                state: Mutex::new(QueueState::default()),
                handlers: RwLock::new(HashMap::new()),
                observers: Observers::default(),
                store: self.store,
                metrics: self.metrics,
            }),
        }
    }
}

/// Single-process job queue.
///
/// Jobs are dispatched earliest-ready first, up to `concurrency` at a time.
/// A job that is not yet ready blocks the ones behind it; a single deferred
/// wake-up re-runs dispatch when it becomes ready. Failed jobs are re-admitted
/// immediately until their attempt budget runs out.
///
/// Cloning is cheap and every clone drives the same queue. Dispatch spawns
/// onto the ambient tokio runtime.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Create a queue with the given configuration and no durable store.
    pub fn new(config: QueueConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> JobQueueBuilder {
        JobQueueBuilder {
            config: QueueConfig::default(),
            store: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Bind the handler for a job type. The last registration wins.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use conveyor_queue::*;
    ///
    /// let queue = JobQueue::new(QueueConfig::default());
    ///
    /// queue.register("send_email", |job: Job| async move {
    ///     println!("Sending email: {:?}", job.payload);
    ///     Ok(())
    /// });
    /// ```
    pub fn register<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let job_type = job_type.into();
        let handler: JobHandler = Arc::new(move |job: Job| handler(job).boxed());

        if self
            .inner
            .handlers
            .write()
            .insert(job_type.clone(), handler)
            .is_some()
        {
            debug!(job_type = %job_type, "Replaced job handler");
        } else {
            debug!(job_type = %job_type, "Registered job handler");
        }
    }

    /// Create a job and admit it.
    ///
    /// A non-zero `delay` sets `scheduled_for = now + delay`.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: JobData,
        max_attempts: u32,
        delay: Duration,
    ) -> Job {
        let options = EnqueueOptions::new().max_attempts(max_attempts).delay(delay);
        self.enqueue_with(job_type, payload, options).await
    }

    /// Create a job with options and admit it.
    pub async fn enqueue_with(
        &self,
        job_type: impl Into<String>,
        payload: JobData,
        options: EnqueueOptions,
    ) -> Job {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.inner.config.default_max_attempts);
        let job = Job::new(job_type, payload)
            .with_max_attempts(max_attempts)
            .schedule_after(options.delay);

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            max_attempts = job.max_attempts,
            delay_ms = options.delay.as_millis() as u64,
            "Enqueueing job"
        );

        if let Some(store) = &self.inner.store
            && let Err(e) = store.create_row(&job).await
        {
            warn!(job_id = %job.id, error = %e, "Failed to mirror new job");
        }

        self.inner.admit(job.clone());
        self.inner.drain();
        job
    }

    /// Register an observer for one kind of queue event.
    pub fn on<F>(&self, kind: QueueEventKind, callback: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.observe(kind, Arc::new(callback));
    }

    /// Register a shared observer for one kind of queue event.
    pub fn observe(&self, kind: QueueEventKind, observer: Arc<dyn QueueObserver>) {
        self.inner.observers.register(kind, observer);
    }

    /// Stop admitting new work. In-flight handlers keep running.
    pub fn pause(&self) {
        let changed = {
            let mut state = self.inner.state.lock();
            !std::mem::replace(&mut state.paused, true)
        };

        if changed {
            info!("Job queue paused");
            self.inner.emit(QueueEvent::Paused);
        }
    }

    /// Resume dispatch.
    pub fn resume(&self) {
        let changed = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.paused, false)
        };

        if changed {
            info!("Job queue resumed");
            self.inner.emit(QueueEvent::Resumed);
            self.inner.drain();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Current statistics.
    pub fn stats(&self) -> QueueStats {
        let mut handlers: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        handlers.sort();

        let state = self.inner.state.lock();
        QueueStats {
            queued: state.pending.len(),
            running: state.running,
            handlers,
            concurrency: self.inner.config.concurrency,
            paused: state.paused,
        }
    }

    /// Snapshot of the pending set in dispatch order.
    pub fn pending(&self) -> Vec<Job> {
        let state = self.inner.state.lock();
        let mut queued: Vec<&Queued> = state.pending.iter().collect();
        queued.sort_by_key(|q| q.key());
        queued.into_iter().map(|q| q.job.clone()).collect()
    }

    /// Age of the oldest pending job, if any.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.inner.oldest_pending_age()
    }

    /// Periodically report the oldest pending age to the metrics sink.
    ///
    /// The sampler holds no strong reference to the queue and stops once every
    /// clone has been dropped.
    pub fn spawn_age_sampler(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.age_sample_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let age = inner.oldest_pending_age().unwrap_or(Duration::ZERO);
                inner.metrics.record_oldest_pending_age(age);
            }
        })
    }

    pub fn is_durable(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Load durable rows into the pending set.
    ///
    /// Pending rows are admitted first, then rows left `running` by a previous
    /// process are flipped back to `pending` and admitted as well. Returns the
    /// number of jobs admitted. Without a store this is a no-op.
    pub async fn recover(&self) -> QueueResult<usize> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(0);
        };

        let mut rows = store.find_pending(None).await?;
        let reset = store.reset_running().await?;
        let reset_count = reset.len();
        rows.extend(reset);

        let admitted = {
            let mut state = self.inner.state.lock();
            let mut known: HashSet<JobId> = state.pending.iter().map(|q| q.job.id).collect();
            let mut admitted = 0;
            for row in rows {
                if known.insert(row.id) {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.pending.push_back(Queued {
                        seq,
                        job: Job::from_row(row),
                    });
                    admitted += 1;
                }
            }
            admitted
        };

        info!(admitted, reset = reset_count, "Recovered durable jobs");
        self.inner.drain();
        Ok(admitted)
    }

    /// Stop dispatch for a graceful exit.
    ///
    /// Pauses the queue, cancels the deferred wake-up and flips durable
    /// `running` rows back to `pending` so the next start recovers them.
    pub async fn shutdown(&self) {
        self.pause();

        let wake = self.inner.state.lock().wake.take();
        if let Some(wake) = wake {
            wake.handle.abort();
        }

        if let Some(store) = &self.inner.store {
            match store.reset_running().await {
                Ok(rows) => info!(reset = rows.len(), "Reset running jobs for shutdown"),
                Err(e) => warn!(error = %e, "Failed to reset running jobs on shutdown"),
            }
        }
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("stats", &self.stats())
            .field("durable", &self.is_durable())
            .finish()
    }
}

impl Inner {
    fn admit(&self, job: Job) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push_back(Queued { seq, job });
    }

    fn emit(&self, event: QueueEvent) {
        self.metrics.record_event(event.kind());
        self.observers.emit(&event);
    }

    fn oldest_pending_age(&self) -> Option<Duration> {
        let oldest = self
            .state
            .lock()
            .pending
            .iter()
            .map(|q| q.job.enqueued_at)
            .min()?;
        Some((Utc::now() - oldest).to_std().unwrap_or(Duration::ZERO))
    }

    /// Dispatch ready jobs until the concurrency limit is reached.
    fn drain(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime; dispatch deferred");
            return;
        };

        let mut dispatched = Vec::new();
        {
            let mut state = self.state.lock();
            if state.paused {
                return;
            }

            state
                .pending
                .make_contiguous()
                .sort_by_key(|q| q.key());

            let now = Utc::now();
            while state.running < self.config.concurrency {
                let Some(head) = state.pending.front() else {
                    break;
                };

                if !head.job.is_ready_at(now) {
                    let at = head.job.ready_at();
                    self.arm_wake(&mut state, at, &runtime);
                    break;
                }

                if let Some(mut queued) = state.pending.pop_front() {
                    queued.job.attempts += 1;
                    state.running += 1;
                    dispatched.push(queued);
                }
            }
        }

        for queued in dispatched {
            runtime.spawn(Arc::clone(self).execute(queued));
        }
    }

    /// Arm the deferred wake-up unless one at or before `at` already exists.
    fn arm_wake(self: &Arc<Self>, state: &mut QueueState, at: DateTime<Utc>, runtime: &Handle) {
        if let Some(wake) = &state.wake
            && wake.at <= at
        {
            return;
        }

        if let Some(old) = state.wake.take() {
            old.handle.abort();
        }

        let id = state.next_wake_id;
        state.next_wake_id += 1;
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                {
                    let mut state = inner.state.lock();
                    if state.wake.as_ref().is_some_and(|w| w.id == id) {
                        state.wake = None;
                    }
                }
                inner.drain();
            }
        });

        state.wake = Some(WakeUp { id, at, handle });
    }

    async fn execute(self: Arc<Self>, queued: Queued) {
        let Queued { seq, job } = queued;
        let mut slot = SlotGuard {
            inner: Arc::clone(&self),
            requeue: None,
        };

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Processing job"
        );
        self.mirror(job.id, JobRowStatus::Running, Some(job.attempts))
            .await;

        let handler = self.handlers.read().get(&job.job_type).cloned();
        let result = match handler {
            Some(handler) => {
                let call = job.clone();
                match AssertUnwindSafe(async move { handler(call).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(QueueError::Panicked(panic_message(&*panic))),
                }
            }
            None => Err(QueueError::NoHandler(job.job_type.clone())),
        };

        match result {
            Ok(()) => {
                debug!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                self.mirror(job.id, JobRowStatus::Completed, Some(job.attempts))
                    .await;
                self.emit(QueueEvent::Processed(job));
            }
            Err(err) => {
                let error = err.to_string();
                self.emit(QueueEvent::Failed {
                    job: job.clone(),
                    error: error.clone(),
                });

                if job.can_retry() {
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempt = job.attempts,
                        max_attempts = job.max_attempts,
                        error = %error,
                        "Job failed, retrying"
                    );
                    self.emit(QueueEvent::Retried(job.clone()));
                    self.mirror(job.id, JobRowStatus::Pending, Some(job.attempts))
                        .await;
                    slot.requeue = Some(Queued { seq, job });
                } else {
                    error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        error = %error,
                        "Job failed permanently"
                    );
                    self.mirror(job.id, JobRowStatus::Failed, Some(job.attempts))
                        .await;
                    self.emit(QueueEvent::Dead { job, error });
                }
            }
        }
    }

    /// Best-effort status mirror. Store failures are logged, never returned.
    async fn mirror(&self, id: JobId, status: JobRowStatus, attempts: Option<u32>) {
        if let Some(store) = &self.store
            && let Err(e) = store.update_status(id, status, attempts).await
        {
            warn!(job_id = %id, status = %status, error = %e, "Failed to mirror job status");
        }
    }
}

/// Releases a concurrency slot when execution ends, however it ends.
struct SlotGuard {
    inner: Arc<Inner>,
    requeue: Option<Queued>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.running = state.running.saturating_sub(1);
            if let Some(queued) = self.requeue.take() {
                state.pending.push_back(queued);
            }
        }
        self.inner.drain();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
