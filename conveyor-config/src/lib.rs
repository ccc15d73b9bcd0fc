//! Layered configuration for Conveyor.
//!
//! - 📄 TOML or JSON files, format picked from the extension
//! - 🌱 `.env` support through `dotenvy`
//! - 🔧 `CONVEYOR_` environment overrides, `__` separating nested keys
//! - ✅ Validation before anything is started
//!
//! Layers apply in order: defaults, file, `.env`, process environment.
//!
//! ```
//! use conveyor_config::ConveyorConfig;
//! use serde_json::json;
//!
//! let config = ConveyorConfig::from_layers(
//!     Some(json!({"queue": {"concurrency": 2}})),
//!     vec![("CONVEYOR_QUEUE__CONCURRENCY".to_string(), "8".to_string())],
//! )
//! .unwrap();
//!
//! assert_eq!(config.queue.concurrency, 8);
//! assert_eq!(config.webhooks.auto_disable_threshold, 10);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat, merge};
pub use settings::{
    BreakerPolicy, BreakerSettings, ConveyorConfig, LogFormat, LoggingSettings, QueueSettings,
    RecurringJob, SchedulerSettings, WebhookSettings,
};
