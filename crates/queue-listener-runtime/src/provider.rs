//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Largest number of entries accepted by one batch send, receive or delete
    pub fn max_batch_size(&self) -> u32 {
        match self {
            Self::AwsSqs => 10,
            Self::InMemory => 10,
        }
    }

    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,   // 256KB
            Self::InMemory => 256 * 1024, // mirrors SQS so limits show up in tests
        }
    }

    /// Longest long-poll wait a single receive may request
    pub fn max_wait_time(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Whether batch deletes report a result for every entry
    pub fn reports_per_message_results(&self) -> bool {
        match self {
            Self::AwsSqs => true,
            Self::InMemory => true,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "aws-sqs"),
            Self::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Configuration for queue service initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueServiceConfig {
    pub provider: ProviderConfig,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AwsSqs(AwsSqsConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::InMemory(InMemoryConfig::default())
    }
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::AwsSqs(_) => ProviderType::AwsSqs,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }
}

/// AWS SQS configuration
///
/// Credentials fall back to the default AWS provider chain when the key pair
/// is not set. `endpoint_url` points the client at a local emulator such as
/// LocalStack or ElasticMQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Time a received message stays hidden before it is redelivered
    pub visibility_timeout_seconds: u64,
    /// How long FIFO deduplication ids are remembered
    pub deduplication_window_seconds: u64,
    /// Create unknown queues on first use instead of failing
    pub auto_create_queues: bool,
}

impl InMemoryConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn deduplication_window(&self) -> Duration {
        Duration::from_secs(self.deduplication_window_seconds)
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 30,
            deduplication_window_seconds: 300,
            auto_create_queues: false,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
