//! One send operation per demo queue.

use crate::config::DemoQueues;
use crate::device::DeviceTemperature;
use crate::listeners::UNIQUE_ID_HEADER;
use queue_listener_runtime::{MessageId, MessageProducer, QueueError, QueueService, SendOptions};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Publishes onto the demo queues
#[derive(Debug, Clone)]
pub struct ProducerService {
    producer: MessageProducer,
    queues: DemoQueues,
}

impl ProducerService {
    pub fn new(service: Arc<dyn QueueService>, queues: DemoQueues) -> Self {
        Self {
            producer: MessageProducer::new(service),
            queues,
        }
    }

    pub async fn send_string(&self, message: &str) -> Result<MessageId, QueueError> {
        self.producer
            .send(&self.queues.string, message.to_string(), SendOptions::new())
            .await
    }

    pub async fn send_string_with_unique_id(
        &self,
        message: &str,
        unique_id: &str,
    ) -> Result<MessageId, QueueError> {
        let options = SendOptions::new().with_header(UNIQUE_ID_HEADER, unique_id);
        self.producer
            .send(&self.queues.string_with_header, message.to_string(), options)
            .await
    }

    pub async fn send_string_batch(
        &self,
        messages: Vec<String>,
    ) -> Result<Vec<MessageId>, QueueError> {
        self.producer
            .send_batch(&self.queues.string_batch, messages)
            .await
    }

    /// Send a message that stays invisible for `delay`
    pub async fn send_string_with_delay(
        &self,
        message: &str,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        self.producer
            .send(
                &self.queues.delayed,
                message.to_string(),
                SendOptions::new().with_delay(delay),
            )
            .await
    }

    pub async fn send_string_to_parallel(&self, message: &str) -> Result<MessageId, QueueError> {
        self.producer
            .send(&self.queues.parallel, message.to_string(), SendOptions::new())
            .await
    }

    /// Identical bodies sent within the dedup window collapse into one message
    pub async fn send_string_to_fifo(&self, message: &str) -> Result<MessageId, QueueError> {
        self.producer
            .send(&self.queues.fifo, message.to_string(), SendOptions::new())
            .await
    }

    pub async fn send_device_temperature(
        &self,
        reading: &DeviceTemperature,
    ) -> Result<MessageId, QueueError> {
        self.producer
            .send_typed(&self.queues.device_temperature, reading, SendOptions::new())
            .await
    }
}
