//! The queue service seam and the factory that builds providers for it.

use crate::error::QueueError;
use crate::message::{Message, MessageEnvelope, MessageId, QueueName, ReceiptHandle};
use crate::provider::{ProviderConfig, ProviderType, QueueServiceConfig};
use crate::providers::{AwsSqsProvider, InMemoryProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Outcome of a batch delete, one entry per receipt handle
#[derive(Debug, Default)]
pub struct BatchDeleteResult {
    pub successful: Vec<ReceiptHandle>,
    pub failed: Vec<FailedDelete>,
}

impl BatchDeleteResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A receipt handle the service refused to delete
#[derive(Debug)]
pub struct FailedDelete {
    pub receipt: ReceiptHandle,
    pub error: QueueError,
}

/// Operations the listener runtime needs from a queue service.
///
/// Implementations must be safe to share between every poll loop and
/// handler task of a dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Send single message to queue
    async fn send_message(&self, queue: &QueueName, message: Message)
        -> Result<MessageId, QueueError>;

    /// Send up to `max_batch_size` messages in one request
    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Long-poll for up to `max_messages`, waiting at most `wait_time`.
    ///
    /// Returns an empty vector when nothing arrived in time.
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Delete a processed message so it is never redelivered
    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Delete several messages, reporting the result of each
    async fn delete_messages(
        &self,
        receipts: Vec<ReceiptHandle>,
    ) -> Result<BatchDeleteResult, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32 {
        self.provider_type().max_batch_size()
    }

    /// Whether `delete_messages` reports per-entry outcomes
    fn reports_per_message_results(&self) -> bool {
        self.provider_type().reports_per_message_results()
    }
}

/// Factory for creating queue services with appropriate providers
pub struct QueueServiceFactory;

impl QueueServiceFactory {
    /// Create queue service from configuration
    pub async fn create(config: QueueServiceConfig) -> Result<Arc<dyn QueueService>, QueueError> {
        let service: Arc<dyn QueueService> = match config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Arc::new(InMemoryProvider::new(in_memory_config))
            }
            ProviderConfig::AwsSqs(aws_config) => Arc::new(AwsSqsProvider::new(aws_config).await?),
        };

        tracing::info!(provider = %service.provider_type(), "Queue service created");
        Ok(service)
    }

    /// Create an in-memory service that creates queues on first use
    pub fn create_test_service() -> Arc<InMemoryProvider> {
        Arc::new(InMemoryProvider::new(crate::provider::InMemoryConfig {
            auto_create_queues: true,
            ..Default::default()
        }))
    }
}
