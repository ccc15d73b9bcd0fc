//! Tracing subscriber setup

use conveyor_config::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `settings.level`; an unparsable level
/// falls back to `info`. Returns `false` when a subscriber was already
/// installed, in which case nothing changes.
pub fn init(settings: &LoggingSettings) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(settings));

    let result = match settings.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

fn filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
