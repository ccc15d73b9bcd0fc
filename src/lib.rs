//! Conveyor - an in-process background job runtime.
//!
//! - 📬 [`JobQueue`]: delayed jobs, bounded concurrency, retries and durable recovery
//! - ⏱️ [`Scheduler`]: recurring jobs enqueued on a fixed interval
//! - 🔌 [`CircuitBreaker`]: shared tripwires for flaky dependencies
//! - 🪝 [`WebhookDeliveryService`]: signed webhook fan-out with backoff and auto-disable
//! - ⚙️ [`ConveyorConfig`]: layered configuration from files and the environment
//!
//! The [`Conveyor`] runtime wires all of them from one configuration.

pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use error::{ConveyorError, ConveyorResult};
pub use runtime::{Conveyor, ConveyorBuilder, RETENTION_SWEEP_JOB};
pub use shutdown::shutdown_signal;

// Component crates
pub use conveyor_config;
pub use conveyor_queue;
pub use conveyor_resilience;
pub use conveyor_scheduler;
pub use conveyor_webhooks;

pub use conveyor_config::ConveyorConfig;
pub use conveyor_queue::{Job, JobQueue, QueueError, QueueEvent, QueueEventKind, QueueStats};
pub use conveyor_resilience::{BreakerRegistry, CircuitBreaker, CircuitBreakerError};
pub use conveyor_scheduler::Scheduler;
pub use conveyor_webhooks::{WebhookDeliveryService, WebhookError};

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime::{Conveyor, RETENTION_SWEEP_JOB};
    pub use crate::shutdown::shutdown_signal;
    pub use conveyor_config::ConveyorConfig;
    pub use conveyor_queue::prelude::*;
    pub use conveyor_resilience::prelude::*;
    pub use conveyor_scheduler::prelude::*;
    pub use conveyor_webhooks::prelude::*;
}
