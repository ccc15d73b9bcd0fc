//! Error types for webhook operations

use conveyor_queue::{QueueError, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Result type for webhook operations
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

/// Errors that can occur during webhook operations
#[derive(Error, Debug)]
pub enum WebhookError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid target URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Receiver answered with a non-2xx status
    #[error("Unexpected response status: {0}")]
    UnexpectedStatus(u16),

    /// Receiver did not answer in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Delivery breaker short-circuited the call
    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    /// Subscription/delivery store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payload serialization/deserialization failed
    #[error("Payload error: {0}")]
    Payload(String),

    /// Subscription not found
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Delivery not found
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    /// Job queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WebhookError {
    /// HTTP status carried by the error, if the receiver answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus(status) => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Payload(err.to_string())
    }
}
