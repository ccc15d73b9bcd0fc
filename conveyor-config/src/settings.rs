// Typed Conveyor configuration

use crate::env::{EnvLoader, process_vars};
use crate::loader::{ConfigLoader, merge};
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Complete runtime configuration.
///
/// Every section falls back to its defaults, so an empty file is a valid
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    pub queue: QueueSettings,
    pub breakers: BreakerSettings,
    pub webhooks: WebhookSettings,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingSettings,
}

/// Job queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum jobs running at once
    pub concurrency: usize,
    /// Mirror jobs into a durable store and recover them at startup
    pub durable: bool,
    /// Attempts for jobs enqueued without an explicit budget
    pub default_max_attempts: u32,
    pub age_sample_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            durable: false,
            default_max_attempts: 3,
            age_sample_interval_ms: 15_000,
        }
    }
}

impl QueueSettings {
    pub fn age_sample_interval(&self) -> Duration {
        Duration::from_millis(self.age_sample_interval_ms)
    }
}

/// Policy of one circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cool-down before a trial call
    pub half_open_after_ms: u64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_after_ms: 30_000,
        }
    }
}

impl BreakerPolicy {
    pub fn half_open_after(&self) -> Duration {
        Duration::from_millis(self.half_open_after_ms)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Policy for breakers without an entry in `named`
    pub default: BreakerPolicy,
    /// Per-breaker overrides, keyed by breaker name
    pub named: BTreeMap<String, BreakerPolicy>,
}

/// Webhook delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub delivery_timeout_ms: u64,
    /// Consecutive failed deliveries before a subscription is disabled
    pub auto_disable_threshold: u32,
    /// Redelivery delays, one per failed attempt
    pub backoff_stages_ms: Vec<u64>,
    /// Multiplicative jitter applied to each stage, in `[0, 1)`
    pub jitter: f64,
    pub max_payload_bytes: usize,
    pub preview_chars: usize,
    pub job_max_attempts: u32,
    /// Overrides the default User-Agent header
    pub user_agent: Option<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 10_000,
            auto_disable_threshold: 10,
            backoff_stages_ms: vec![30_000, 120_000, 600_000, 1_800_000, 7_200_000],
            jitter: 0.2,
            max_payload_bytes: 64 * 1024,
            preview_chars: 1024,
            job_max_attempts: 5,
            user_agent: None,
        }
    }
}

impl WebhookSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn backoff_stages(&self) -> Vec<Duration> {
        self.backoff_stages_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

/// A job type enqueued on a fixed interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub job_type: String,
    pub interval_ms: u64,
}

impl RecurringJob {
    pub fn new(job_type: impl Into<String>, interval: Duration) -> Self {
        Self {
            job_type: job_type.into(),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub recurring: Vec<RecurringJob>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Single-line human readable output
    Compact,
    /// One JSON object per line
    #[default]
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info", "conveyor_queue=debug")
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl ConveyorConfig {
    /// Load configuration from every layer.
    ///
    /// Layers, lowest precedence first: defaults, the optional file, `.env`
    /// in the working directory, then `CONVEYOR_*` process variables. `.env`
    /// never overrides a variable already set in the process.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(load_file_layer).transpose()?;

        match dotenvy::dotenv() {
            Ok(dotenv) => debug!(path = %dotenv.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ConfigError::LoadError(format!(".env: {}", e))),
        }

        Self::from_layers(file, process_vars())
    }

    /// Load configuration from a file alone, without environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = load_file_layer(path.as_ref())?;
        Self::from_layers(Some(file), std::iter::empty())
    }

    /// Build a configuration from an optional file layer and a set of
    /// environment variables, then validate it.
    pub fn from_layers(
        file: Option<Value>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut tree = serde_json::to_value(Self::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        if let Some(file) = file {
            merge(&mut tree, file);
        }

        let overrides = EnvLoader::default().apply_vars(&mut tree, vars);
        if overrides > 0 {
            debug!(overrides, "Applied environment overrides");
        }

        let config: Self = serde_json::from_value(tree)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        config.validate()?;

        info!(
            concurrency = config.queue.concurrency,
            durable = config.queue.durable,
            recurring = config.scheduler.recurring.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            return invalid("queue.concurrency must be at least 1");
        }
        if self.queue.default_max_attempts == 0 {
            return invalid("queue.default_max_attempts must be at least 1");
        }
        if self.queue.age_sample_interval_ms == 0 {
            return invalid("queue.age_sample_interval_ms must be positive");
        }

        validate_policy("breakers.default", &self.breakers.default)?;
        for (name, policy) in &self.breakers.named {
            validate_policy(&format!("breakers.named.{}", name), policy)?;
        }

        let webhooks = &self.webhooks;
        if webhooks.delivery_timeout_ms == 0 {
            return invalid("webhooks.delivery_timeout_ms must be positive");
        }
        if webhooks.auto_disable_threshold == 0 {
            return invalid("webhooks.auto_disable_threshold must be at least 1");
        }
        if webhooks.backoff_stages_ms.is_empty() {
            return invalid("webhooks.backoff_stages_ms cannot be empty");
        }
        if !(0.0..1.0).contains(&webhooks.jitter) {
            return invalid("webhooks.jitter must be in [0, 1)");
        }
        if webhooks.job_max_attempts == 0 {
            return invalid("webhooks.job_max_attempts must be at least 1");
        }

        for job in &self.scheduler.recurring {
            if job.job_type.is_empty() {
                return invalid("scheduler.recurring job_type cannot be empty");
            }
            if job.interval_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "scheduler.recurring interval for '{}' must be positive",
                    job.job_type
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return invalid("logging.level cannot be empty");
        }

        Ok(())
    }
}

fn load_file_layer(path: &Path) -> Result<Value> {
    ConfigLoader::auto(path)?.load_file(path)
}

fn validate_policy(field: &str, policy: &BreakerPolicy) -> Result<()> {
    if policy.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.failure_threshold must be at least 1",
            field
        )));
    }
    Ok(())
}

fn invalid(message: &str) -> Result<()> {
    Err(ConfigError::ValidationError(message.to_string()))
}
