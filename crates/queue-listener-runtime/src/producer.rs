//! Publishing facade over a [`QueueService`].

use crate::client::QueueService;
use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::QueueError;
use crate::message::{Message, MessageGroupId, MessageId, QueueName, SendOptions};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Sends raw and typed payloads, filling in FIFO defaults
#[derive(Clone)]
pub struct MessageProducer {
    service: Arc<dyn QueueService>,
}

impl MessageProducer {
    pub fn new(service: Arc<dyn QueueService>) -> Self {
        Self { service }
    }

    /// Send one message with the given headers, delay and FIFO settings
    pub async fn send(
        &self,
        queue: &QueueName,
        body: impl Into<Bytes>,
        options: SendOptions,
    ) -> Result<MessageId, QueueError> {
        let message = prepare(queue, options.into_message(body.into()));
        let message_id = self.service.send_message(queue, message).await?;

        debug!(queue = %queue, message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    /// Encode `value` with the same [`JsonCodec`] typed listeners decode with
    pub async fn send_typed<T>(
        &self,
        queue: &QueueName,
        value: &T,
        options: SendOptions,
    ) -> Result<MessageId, QueueError>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = JsonCodec::<T>::new().encode(value)?;
        self.send(queue, body, options).await
    }

    /// Send several bodies, split into provider-sized batches.
    ///
    /// Returned ids are in the order of `bodies`.
    pub async fn send_batch<B>(
        &self,
        queue: &QueueName,
        bodies: impl IntoIterator<Item = B>,
    ) -> Result<Vec<MessageId>, QueueError>
    where
        B: Into<Bytes>,
    {
        let messages: Vec<Message> = bodies
            .into_iter()
            .map(|body| prepare(queue, Message::new(body.into())))
            .collect();

        let chunk_size = self.service.max_batch_size().max(1) as usize;
        let mut ids = Vec::with_capacity(messages.len());

        for chunk in messages.chunks(chunk_size) {
            ids.extend(self.service.send_messages(queue, chunk.to_vec()).await?);
        }

        debug!(queue = %queue, count = ids.len(), "Batch sent");
        Ok(ids)
    }

    /// Encode every value as JSON and send them in batches
    pub async fn send_typed_batch<T>(
        &self,
        queue: &QueueName,
        values: &[T],
    ) -> Result<Vec<MessageId>, QueueError>
    where
        T: Serialize + DeserializeOwned,
    {
        let codec = JsonCodec::<T>::new();
        let bodies = values
            .iter()
            .map(|value| codec.encode(value))
            .collect::<Result<Vec<_>, _>>()?;

        self.send_batch(queue, bodies).await
    }
}

impl std::fmt::Debug for MessageProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProducer")
            .field("provider", &self.service.provider_type())
            .finish()
    }
}

/// FIFO messages without a group go to the default group
fn prepare(queue: &QueueName, mut message: Message) -> Message {
    if queue.is_fifo() && message.group_id.is_none() {
        message.group_id = Some(MessageGroupId::default_group());
    }
    message
}
