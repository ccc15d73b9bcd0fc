//! In-process job queue for Conveyor.
//!
//! Provides a single-process job runner with:
//! - ⏰ Delayed jobs, dispatched earliest-ready first
//! - 🚦 Bounded concurrency of in-flight handlers
//! - 🔄 Immediate retries up to a per-job attempt budget
//! - 💀 Dead-job signalling once the budget is used
//! - 👀 Typed event observers (`processed`, `failed`, `retried`, `dead`, ...)
//! - 💾 Optional durable mirror for crash recovery
//! - 📊 Oldest-pending-age sampling into a metrics sink
//!
//! ## Quick Start - Job Creation
//!
//! ```
//! use conveyor_queue::Job;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let job = Job::new("send_welcome", json!({"to": "user@example.com"}))
//!     .with_max_attempts(5)
//!     .schedule_after(Duration::from_secs(3600));
//!
//! assert_eq!(job.job_type, "send_welcome");
//! assert_eq!(job.max_attempts, 5);
//! assert!(!job.is_ready());
//! ```
//!
//! ## Queue Configuration
//!
//! ```
//! use conveyor_queue::QueueConfig;
//! use std::time::Duration;
//!
//! let config = QueueConfig::default()
//!     .with_concurrency(8)
//!     .with_age_sample_interval(Duration::from_secs(30));
//!
//! assert_eq!(config.concurrency, 8);
//! assert_eq!(config.default_max_attempts, 3);
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use conveyor_queue::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let queue = JobQueue::builder()
//!         .concurrency(4)
//!         .with_store(Arc::new(MemoryJobStore::new()))
//!         .build();
//!
//!     queue.register("send_email", |job: Job| async move {
//!         println!("Sending email: {}", job.payload);
//!         Ok(())
//!     });
//!
//!     queue.on(QueueEventKind::Dead, |event: &QueueEvent| {
//!         eprintln!("Job gave up: {:?}", event.error());
//!     });
//!
//!     queue.recover().await?;
//!     queue
//!         .enqueue("send_email", serde_json::json!({"to": "user@example.com"}), 3, Duration::ZERO)
//!         .await;
//!
//!     queue.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod store;

pub use error::{QueueError, QueueResult, StoreError};
pub use events::{QueueEvent, QueueEventKind, QueueObserver};
pub use job::{DEFAULT_MAX_ATTEMPTS, Job, JobData, JobId, JobRow, JobRowStatus};
pub use memory::MemoryJobStore;
pub use metrics::{NoopMetrics, QueueMetrics};
pub use queue::{EnqueueOptions, JobHandler, JobQueue, JobQueueBuilder, QueueConfig, QueueStats};
pub use store::JobStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::events::{QueueEvent, QueueEventKind};
    pub use crate::job::{Job, JobData, JobId};
    pub use crate::queue::{EnqueueOptions, JobQueue, QueueConfig, QueueStats};
    pub use crate::store::JobStore;
}
