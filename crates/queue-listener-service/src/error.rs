//! Error types for the demo service.

use queue_listener_runtime::{ConfigurationError, QueueError};

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Listener setup failed: {0}")]
    Listener(#[from] ConfigurationError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Logging initialisation failed: {message}")]
    Telemetry { message: String },

    #[error("Listeners did not drain within {seconds}s")]
    ShutdownTimedOut { seconds: u64 },
}

impl ServiceError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceError::Queue(_) => 2,
            ServiceError::Configuration(_) | ServiceError::Listener(_) => 3,
            ServiceError::Telemetry { .. } => 4,
            ServiceError::ShutdownTimedOut { .. } => 5,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}
