//! Service configuration.
//!
//! Sources, applied in order with later ones overriding earlier ones:
//!
//! 1. `/etc/queue-listener/service.yaml`
//! 2. `./config/service.yaml`
//! 3. an explicit file (`--config` or `QL_CONFIG_FILE`)
//! 4. environment variables prefixed `QL__`, e.g.
//!    `QL__PROVIDER__TYPE=aws_sqs` or `QL__SHUTDOWN_TIMEOUT_SECONDS=10`
//!
//! Every field has a default, so running with no configuration at all gives
//! an in-memory provider with the seven demo queues.

use crate::error::ConfigError;
use queue_listener_runtime::{ListenerConfig, ProviderConfig, QueueDescriptor, QueueName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

const SYSTEM_CONFIG_FILE: &str = "/etc/queue-listener/service";
const LOCAL_CONFIG_FILE: &str = "config/service";
const ENV_PREFIX: &str = "QL";

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Queue service backend
    pub provider: ProviderConfig,

    /// Names of the demo queues
    pub queues: QueueNames,

    /// Per-queue listener overrides, keyed by queue name
    pub listeners: HashMap<String, ListenerOverride>,

    pub logging: LoggingConfig,

    /// How long `listen` waits for in-flight handlers on shutdown
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            queues: QueueNames::default(),
            listeners: HashMap::new(),
            logging: LoggingConfig::default(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the standard sources plus an optional
    /// explicit file, then validate it
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name(SYSTEM_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name(LOCAL_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ServiceConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "shutdown_timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if let ProviderConfig::AwsSqs(aws) = &self.provider {
            if aws.region.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "provider.region".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            if aws.access_key_id.is_some() != aws.secret_access_key.is_some() {
                return Err(ConfigError::Invalid {
                    field: "provider.access_key_id".to_string(),
                    message: "access key id and secret access key must be set together"
                        .to_string(),
                });
            }
        }

        let queues = self.queues.resolve()?;
        for name in self.listeners.keys() {
            if !queues.iter().any(|q| q.as_str() == name) {
                return Err(ConfigError::Invalid {
                    field: format!("listeners.{}", name),
                    message: "does not name a configured queue".to_string(),
                });
            }
        }

        self.logging.validate()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Apply the override configured for `config`'s queue, if any
    pub fn listener_config(&self, config: ListenerConfig) -> ListenerConfig {
        match self.listeners.get(config.queue_name().as_str()) {
            Some(overrides) => overrides.apply(config),
            None => config,
        }
    }
}

// ============================================================================
// Queues
// ============================================================================

/// Names of the seven demo queues
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub string: String,
    pub string_with_header: String,
    pub string_batch: String,
    pub delayed: String,
    pub parallel: String,
    /// Must end in `.fifo`
    pub fifo: String,
    pub device_temperature: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            string: "string-queue".to_string(),
            string_with_header: "header-queue".to_string(),
            string_batch: "batch-queue".to_string(),
            delayed: "delay-queue".to_string(),
            parallel: "parallel-queue".to_string(),
            fifo: "fifo-queue.fifo".to_string(),
            device_temperature: "temperature-queue".to_string(),
        }
    }
}

impl QueueNames {
    /// Validate every name and build the typed set
    pub fn resolve(&self) -> Result<DemoQueues, ConfigError> {
        let parse = |field: &str, value: &str| {
            QueueName::new(value.to_string()).map_err(|e| ConfigError::Invalid {
                field: format!("queues.{}", field),
                message: e.to_string(),
            })
        };

        let queues = DemoQueues {
            string: parse("string", &self.string)?,
            string_with_header: parse("string_with_header", &self.string_with_header)?,
            string_batch: parse("string_batch", &self.string_batch)?,
            delayed: parse("delayed", &self.delayed)?,
            parallel: parse("parallel", &self.parallel)?,
            fifo: parse("fifo", &self.fifo)?,
            device_temperature: parse("device_temperature", &self.device_temperature)?,
        };

        if !queues.fifo.is_fifo() {
            return Err(ConfigError::Invalid {
                field: "queues.fifo".to_string(),
                message: "FIFO queue name must end in '.fifo'".to_string(),
            });
        }

        for (index, queue) in queues.iter().enumerate() {
            if queue != &queues.fifo && queue.is_fifo() {
                return Err(ConfigError::Invalid {
                    field: format!("queues.{}", queue),
                    message: "only the FIFO queue may end in '.fifo'".to_string(),
                });
            }
            if queues.iter().skip(index + 1).any(|other| other == queue) {
                return Err(ConfigError::Invalid {
                    field: "queues".to_string(),
                    message: format!("queue '{}' is configured twice", queue),
                });
            }
        }

        Ok(queues)
    }
}

/// Validated demo queue names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoQueues {
    pub string: QueueName,
    pub string_with_header: QueueName,
    pub string_batch: QueueName,
    pub delayed: QueueName,
    pub parallel: QueueName,
    pub fifo: QueueName,
    pub device_temperature: QueueName,
}

impl DemoQueues {
    pub fn iter(&self) -> impl Iterator<Item = &QueueName> {
        [
            &self.string,
            &self.string_with_header,
            &self.string_batch,
            &self.delayed,
            &self.parallel,
            &self.fifo,
            &self.device_temperature,
        ]
        .into_iter()
    }

    /// Descriptors for declaring the queues
    pub fn descriptors(&self) -> Vec<QueueDescriptor> {
        self.iter().map(Self::descriptor).collect()
    }

    /// Descriptor for one demo queue; the FIFO queue deduplicates on content
    pub fn descriptor(name: &QueueName) -> QueueDescriptor {
        QueueDescriptor::new(name.clone()).with_content_based_deduplication(name.is_fifo())
    }
}

// ============================================================================
// Listener overrides
// ============================================================================

/// Operator overrides for one listener's polling settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerOverride {
    pub max_concurrent_messages: Option<u32>,
    pub max_messages_per_poll: Option<u32>,
    pub poll_timeout_seconds: Option<u64>,
    pub handler_timeout_seconds: Option<u64>,
}

impl ListenerOverride {
    pub fn apply(&self, mut config: ListenerConfig) -> ListenerConfig {
        if let Some(max) = self.max_concurrent_messages {
            config = config.with_max_concurrent_messages(max);
        }
        if let Some(max) = self.max_messages_per_poll {
            config = config.with_max_messages_per_poll(max);
        }
        if let Some(seconds) = self.poll_timeout_seconds {
            config = config.with_poll_timeout(Duration::from_secs(seconds));
        }
        if let Some(seconds) = self.handler_timeout_seconds {
            config = config.with_handler_timeout(Duration::from_secs(seconds));
        }
        config
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for this service and the runtime; `RUST_LOG` wins when set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    fn validate(&self) -> Result<(), ConfigError> {
        if Self::LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                field: "logging.level".to_string(),
                message: format!("expected one of {}", Self::LEVELS.join(", ")),
            })
        }
    }
}
