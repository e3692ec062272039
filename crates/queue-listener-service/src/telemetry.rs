//! Logging setup for the service binary.

use crate::config::LoggingConfig;
use crate::error::ServiceError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;

/// Default filter directives for a level
pub fn default_directives(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    format!("queue_listener_service={level},queue_listener_runtime={level}")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServiceError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .map_err(|e| ServiceError::Telemetry {
            message: e.to_string(),
        })?;

    let format_layer = if config.json_format {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(format_layer)
        .try_init()
        .map_err(|e| ServiceError::Telemetry {
            message: e.to_string(),
        })
}
