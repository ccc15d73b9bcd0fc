//! Error types for the Conveyor runtime

use conveyor_config::ConfigError;
use conveyor_queue::QueueError;
use conveyor_scheduler::SchedulerError;
use conveyor_webhooks::WebhookError;
use thiserror::Error;

/// Result type for runtime operations
pub type ConveyorResult<T> = std::result::Result<T, ConveyorError>;

/// Errors raised while wiring or running the runtime
#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Components could not be assembled from the configuration
    #[error("Setup error: {0}")]
    Setup(String),
}
