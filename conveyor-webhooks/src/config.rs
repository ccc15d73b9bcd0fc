//! Configuration for webhook delivery

use crate::BackoffSchedule;
use std::time::Duration;

/// Configuration for the delivery service
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Timeout for a single outbound request
    pub delivery_timeout: Duration,

    /// Consecutive terminal failures before a subscription is disabled
    pub auto_disable_threshold: u32,

    /// Redelivery schedule
    pub backoff: BackoffSchedule,

    /// Largest serialized payload stored as-is
    pub max_payload_bytes: usize,

    /// Characters kept in the preview of an oversized payload
    pub preview_chars: usize,

    /// Queue attempt budget of each delivery job
    pub job_max_attempts: u32,

    /// User-Agent header for outgoing requests
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            auto_disable_threshold: 10,
            backoff: BackoffSchedule::default(),
            max_payload_bytes: 64 * 1024,
            preview_chars: 1024,
            job_max_attempts: 5,
            user_agent: format!("Conveyor-Webhooks/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WebhookConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::new()
    }
}

/// Builder for WebhookConfig
#[derive(Debug, Clone, Default)]
pub struct WebhookConfigBuilder {
    config: WebhookConfig,
}

impl WebhookConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: WebhookConfig::default(),
        }
    }

    /// Set the request timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Set the auto-disable threshold (at least one)
    pub fn auto_disable_threshold(mut self, threshold: u32) -> Self {
        self.config.auto_disable_threshold = threshold.max(1);
        self
    }

    /// Set the redelivery schedule
    pub fn backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the largest payload stored without truncation
    pub fn max_payload_bytes(mut self, size: usize) -> Self {
        self.config.max_payload_bytes = size;
        self
    }

    /// Set the preview length of truncated payloads
    pub fn preview_chars(mut self, chars: usize) -> Self {
        self.config.preview_chars = chars;
        self
    }

    /// Set the queue attempt budget of delivery jobs
    pub fn job_max_attempts(mut self, attempts: u32) -> Self {
        self.config.job_max_attempts = attempts.max(1);
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> WebhookConfig {
        self.config
    }
}
