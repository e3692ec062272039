//! Listener registration.
//!
//! Listeners are registered explicitly at startup on a
//! [`ListenerRegistryBuilder`]. [`ListenerRegistryBuilder::build`] validates
//! every registration and produces an immutable [`ListenerRegistry`] that the
//! dispatcher reads without synchronization.

use crate::codec::{JsonCodec, PayloadCodec, RawStringCodec};
use crate::error::{ConfigurationError, HandlerError};
use crate::message::{MessageEnvelope, MessageGroupId, MessageId, QueueDescriptor, QueueName};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Largest number of messages one receive call may return
pub const MAX_MESSAGES_PER_POLL: u32 = 10;

/// Longest long-poll wait a listener may configure
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Ratio of worker slots to poll size above which a listener is rejected
pub const MAX_CONCURRENCY_PER_POLL_RATIO: u32 = 100;

// ============================================================================
// Listener configuration
// ============================================================================

/// Shape of the payload a handler receives. Set by the registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    RawString,
    TypedObject,
    BatchOfMessages,
    BatchOfTypedObjects,
}

impl PayloadType {
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::BatchOfMessages | Self::BatchOfTypedObjects)
    }
}

/// Polling and concurrency settings for one listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub queue: QueueDescriptor,
    /// Upper bound on un-acknowledged messages held by handlers
    pub max_concurrent_messages: u32,
    /// Largest number of messages requested per receive
    pub max_messages_per_poll: u32,
    /// Long-poll wait per receive
    pub poll_timeout: Duration,
    /// Abandon handler invocations that run longer than this
    pub handler_timeout: Option<Duration>,
    payload_type: PayloadType,
}

impl ListenerConfig {
    pub fn new(queue: QueueDescriptor) -> Self {
        Self {
            queue,
            max_concurrent_messages: 10,
            max_messages_per_poll: 10,
            poll_timeout: Duration::from_secs(10),
            handler_timeout: None,
            payload_type: PayloadType::RawString,
        }
    }

    pub fn with_max_concurrent_messages(mut self, max: u32) -> Self {
        self.max_concurrent_messages = max;
        self
    }

    pub fn with_max_messages_per_poll(mut self, max: u32) -> Self {
        self.max_messages_per_poll = max;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue.name
    }

    /// Check the settings against the limits of the queue service
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let queue_name = self.queue.name.to_string();
        let invalid = |message: String| ConfigurationError::InvalidConcurrency {
            queue_name: queue_name.clone(),
            message,
        };

        self.queue
            .validate()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("queue '{}': {}", queue_name, e),
            })?;

        if self.max_concurrent_messages == 0 {
            return Err(invalid("max_concurrent_messages must be at least 1".to_string()));
        }

        if !(1..=MAX_MESSAGES_PER_POLL).contains(&self.max_messages_per_poll) {
            return Err(invalid(format!(
                "max_messages_per_poll must be between 1 and {}",
                MAX_MESSAGES_PER_POLL
            )));
        }

        if self.max_concurrent_messages
            > self
                .max_messages_per_poll
                .saturating_mul(MAX_CONCURRENCY_PER_POLL_RATIO)
        {
            return Err(invalid(format!(
                "max_concurrent_messages {} cannot be filled by polls of {} message(s)",
                self.max_concurrent_messages, self.max_messages_per_poll
            )));
        }

        if self.poll_timeout > MAX_POLL_TIMEOUT {
            return Err(invalid(format!(
                "poll_timeout must not exceed {} seconds",
                MAX_POLL_TIMEOUT.as_secs()
            )));
        }

        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("handler_timeout must be greater than zero".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Deliveries
// ============================================================================

/// A decoded message as seen by a handler
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub payload: T,
    pub headers: HashMap<String, String>,
    pub message_id: MessageId,
    pub group_id: Option<MessageGroupId>,
    pub receive_count: u32,
    /// Worker slot executing this delivery, in `0..max_concurrent_messages`
    pub worker_id: usize,
}

impl<T> Delivery<T> {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn from_envelope(envelope: MessageEnvelope, payload: T, worker_id: usize) -> Self {
        Self {
            payload,
            headers: envelope.headers,
            message_id: envelope.message_id,
            group_id: envelope.group_id,
            receive_count: envelope.receive_count,
            worker_id,
        }
    }
}

// ============================================================================
// Type-erased handlers
// ============================================================================

pub(crate) type SingleHandler = Arc<
    dyn Fn(MessageEnvelope, usize) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
>;

pub(crate) type BatchHandler = Arc<
    dyn Fn(Vec<(MessageEnvelope, usize)>) -> BoxFuture<'static, Result<(), HandlerError>>
        + Send
        + Sync,
>;

/// A handler after its payload type has been erased
#[derive(Clone)]
pub(crate) enum DispatchHandler {
    Single(SingleHandler),
    Batch(BatchHandler),
}

fn single_handler<T, C, F, Fut>(codec: C, handler: F) -> SingleHandler
where
    T: Send + 'static,
    C: PayloadCodec<T> + 'static,
    F: Fn(Delivery<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    let codec = Arc::new(codec);
    let handler = Arc::new(handler);

    Arc::new(move |envelope: MessageEnvelope, worker_id: usize| {
        let decoded = codec.decode(&envelope.body);
        let handler = Arc::clone(&handler);

        async move {
            let payload = decoded?;
            handler(Delivery::from_envelope(envelope, payload, worker_id)).await
        }
        .boxed()
    })
}

fn batch_handler<T, C, F, Fut>(codec: C, handler: F) -> BatchHandler
where
    T: Send + 'static,
    C: PayloadCodec<T> + 'static,
    F: Fn(Vec<Delivery<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    let codec = Arc::new(codec);
    let handler = Arc::new(handler);

    Arc::new(move |envelopes: Vec<(MessageEnvelope, usize)>| {
        let mut deliveries = Vec::with_capacity(envelopes.len());
        let mut undecodable = Vec::new();

        for (envelope, worker_id) in envelopes {
            match codec.decode(&envelope.body) {
                Ok(payload) => {
                    deliveries.push(Delivery::from_envelope(envelope, payload, worker_id))
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %envelope.message_id,
                        error = %e,
                        "Dropping undecodable message from batch"
                    );
                    undecodable.push(envelope.message_id);
                }
            }
        }

        let handler = Arc::clone(&handler);
        async move {
            let outcome = if deliveries.is_empty() {
                Ok(())
            } else {
                handler(deliveries).await
            };

            merge_decode_failures(outcome, undecodable)
        }
        .boxed()
    })
}

/// Fold decode failures into the handler's own outcome
fn merge_decode_failures(
    outcome: Result<(), HandlerError>,
    undecodable: Vec<MessageId>,
) -> Result<(), HandlerError> {
    if undecodable.is_empty() {
        return outcome;
    }

    match outcome {
        Ok(()) => Err(HandlerError::PartialBatch {
            message: format!("{} payload(s) could not be decoded", undecodable.len()),
            failed: undecodable,
        }),
        Err(HandlerError::PartialBatch {
            mut failed,
            message,
        }) => {
            failed.extend(undecodable);
            Err(HandlerError::PartialBatch { failed, message })
        }
        Err(other) => Err(other),
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A registered listener
pub struct Listener {
    config: ListenerConfig,
    pub(crate) handler: DispatchHandler,
}

impl Listener {
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Collects listener registrations before they are validated
#[derive(Default)]
pub struct ListenerRegistryBuilder {
    listeners: Vec<Listener>,
}

impl ListenerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for UTF-8 text messages
    pub fn register_raw<F, Fut>(&mut self, config: ListenerConfig, handler: F) -> &mut Self
    where
        F: Fn(Delivery<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(
            config,
            PayloadType::RawString,
            DispatchHandler::Single(single_handler(RawStringCodec, handler)),
        )
    }

    /// Register a handler for JSON messages decoded into `T`
    pub fn register_typed<T, F, Fut>(&mut self, config: ListenerConfig, handler: F) -> &mut Self
    where
        T: DeserializeOwned + serde::Serialize + Send + 'static,
        F: Fn(Delivery<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_with_codec(config, JsonCodec::<T>::new(), handler)
    }

    /// Register a handler receiving every text message of a poll at once
    pub fn register_raw_batch<F, Fut>(&mut self, config: ListenerConfig, handler: F) -> &mut Self
    where
        F: Fn(Vec<Delivery<String>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(
            config,
            PayloadType::BatchOfMessages,
            DispatchHandler::Batch(batch_handler(RawStringCodec, handler)),
        )
    }

    /// Register a handler receiving every decoded message of a poll at once
    pub fn register_typed_batch<T, F, Fut>(
        &mut self,
        config: ListenerConfig,
        handler: F,
    ) -> &mut Self
    where
        T: DeserializeOwned + serde::Serialize + Send + 'static,
        F: Fn(Vec<Delivery<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(
            config,
            PayloadType::BatchOfTypedObjects,
            DispatchHandler::Batch(batch_handler(JsonCodec::<T>::new(), handler)),
        )
    }

    /// Register a single-message handler with a custom codec
    pub fn register_with_codec<T, C, F, Fut>(
        &mut self,
        config: ListenerConfig,
        codec: C,
        handler: F,
    ) -> &mut Self
    where
        T: Send + 'static,
        C: PayloadCodec<T> + 'static,
        F: Fn(Delivery<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(
            config,
            PayloadType::TypedObject,
            DispatchHandler::Single(single_handler(codec, handler)),
        )
    }

    fn push(
        &mut self,
        mut config: ListenerConfig,
        payload_type: PayloadType,
        handler: DispatchHandler,
    ) -> &mut Self {
        config.payload_type = payload_type;
        self.listeners.push(Listener { config, handler });
        self
    }

    /// Validate all registrations and freeze them
    pub fn build(self) -> Result<ListenerRegistry, ConfigurationError> {
        let mut index = HashMap::with_capacity(self.listeners.len());
        let mut listeners = Vec::with_capacity(self.listeners.len());

        for listener in self.listeners {
            listener.config.validate()?;

            let name = listener.config.queue_name().clone();
            if index.contains_key(&name) {
                return Err(ConfigurationError::DuplicateListener {
                    queue_name: name.to_string(),
                });
            }

            index.insert(name, listeners.len());
            listeners.push(Arc::new(listener));
        }

        tracing::debug!(listeners = listeners.len(), "Listener registry built");
        Ok(ListenerRegistry { listeners, index })
    }
}

/// Immutable set of listeners, one per queue
#[derive(Debug, Clone)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<Listener>>,
    index: HashMap<QueueName, usize>,
}

impl ListenerRegistry {
    pub fn builder() -> ListenerRegistryBuilder {
        ListenerRegistryBuilder::new()
    }

    /// Listeners in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Listener>> {
        self.listeners.iter()
    }

    pub fn get(&self, queue: &QueueName) -> Option<&Arc<Listener>> {
        self.index.get(queue).map(|&i| &self.listeners[i])
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
