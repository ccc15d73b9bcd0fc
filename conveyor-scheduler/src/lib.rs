//! Recurring task scheduling for Conveyor.
//!
//! Issues tick jobs into a [`conveyor_queue::JobQueue`] at fixed intervals,
//! used to drive maintenance work such as retention sweeps:
//! - ⏱️ Fixed intervals, first tick after one full interval
//! - 🔁 Idempotent registration per job type and interval
//! - 🛑 Cancellation that wins races against an in-flight timer
//!
//! ## Complete Example
//!
//! ```no_run
//! use conveyor_queue::{Job, JobQueue, QueueConfig};
//! use conveyor_scheduler::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SchedulerError> {
//!     let queue = JobQueue::new(QueueConfig::default());
//!     queue.register("retention.sweep", |_job: Job| async move {
//!         println!("Sweeping old rows");
//!         Ok(())
//!     });
//!
//!     let scheduler = Scheduler::new(queue);
//!     let task = scheduler.schedule("retention.sweep", Duration::from_secs(3600))?;
//!
//!     // Later
//!     scheduler.cancel(task);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{ScheduledTaskInfo, Scheduler, TaskId};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{SchedulerError, SchedulerResult};
    pub use crate::scheduler::{ScheduledTaskInfo, Scheduler, TaskId};
}
