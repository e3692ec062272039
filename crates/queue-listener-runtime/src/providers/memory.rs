//! In-memory queue provider implementation for testing and development.
//!
//! This module provides an in-process emulation of an SQS-style queue service:
//! - Delivery delays and visibility timeouts with redelivery
//! - Long polling that wakes as soon as a message is sent
//! - FIFO queues with message-group locking and deduplication
//! - The batch and size limits a real service enforces
//!
//! This provider is intended for:
//! - Unit and integration testing of listeners
//! - Local development without cloud credentials

use crate::client::{BatchDeleteResult, FailedDelete, QueueService};
use crate::error::{QueueError, ValidationError};
use crate::message::{
    DeduplicationId, Message, MessageEnvelope, MessageGroupId, MessageId, QueueDescriptor,
    QueueName, ReceiptHandle, Timestamp, MAX_DELAY,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// How often a waiting receive re-checks for delayed or reclaimed messages
const POLL_TICK: Duration = Duration::from_millis(25);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    /// Look up a queue, creating it when auto-creation is enabled
    fn queue_mut(&mut self, queue_name: &QueueName) -> Result<&mut InMemoryQueue, QueueError> {
        if !self.queues.contains_key(queue_name) {
            if !self.config.auto_create_queues {
                return Err(QueueError::QueueNotFound {
                    queue_name: queue_name.to_string(),
                });
            }

            let descriptor = QueueDescriptor::new(queue_name.clone());
            self.queues
                .insert(queue_name.clone(), InMemoryQueue::new(descriptor));
        }

        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    descriptor: QueueDescriptor,
    /// Messages waiting for delivery, keyed by send order
    pending: BTreeMap<u64, StoredMessage>,
    /// Received but not yet deleted messages, keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
    /// Deduplication ids seen within the window and the message they produced
    dedup: HashMap<DeduplicationId, (MessageId, Instant)>,
    next_sequence: u64,
}

impl InMemoryQueue {
    fn new(descriptor: QueueDescriptor) -> Self {
        Self {
            descriptor,
            pending: BTreeMap::new(),
            in_flight: HashMap::new(),
            dedup: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Put messages whose visibility timeout lapsed back in line
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(in_flight) = self.in_flight.remove(&handle) {
                self.pending
                    .insert(in_flight.message.sequence, in_flight.message);
            }
        }
    }

    /// Resolve the deduplication id for a FIFO send
    fn deduplication_id(&self, message: &Message) -> Result<DeduplicationId, QueueError> {
        if let Some(id) = &message.deduplication_id {
            return Ok(id.clone());
        }

        if self.descriptor.content_based_deduplication {
            return Ok(DeduplicationId::from_content(&message.body));
        }

        Err(ValidationError::Required {
            field: "deduplication_id".to_string(),
        }
        .into())
    }

    /// Check a message against the rules of this queue before anything is stored
    fn validate(&self, message: &Message) -> Result<(), QueueError> {
        let max_size = ProviderType::InMemory.max_message_size();
        let size = message.encoded_size();
        if size > max_size {
            return Err(QueueError::MessageTooLarge { size, max_size });
        }

        if let Some(delay) = message.delay {
            if delay > MAX_DELAY {
                return Err(ValidationError::OutOfRange {
                    field: "delay".to_string(),
                    message: format!("maximum {} seconds", MAX_DELAY.as_secs()),
                }
                .into());
            }
        }

        if self.descriptor.is_fifo() {
            if message.group_id.is_none() {
                return Err(ValidationError::Required {
                    field: "message_group_id".to_string(),
                }
                .into());
            }

            if message.delay.is_some_and(|d| !d.is_zero()) {
                return Err(ValidationError::InvalidFormat {
                    field: "delay".to_string(),
                    message: "FIFO queues do not support per-message delays".to_string(),
                }
                .into());
            }

            self.deduplication_id(message)?;
        }

        Ok(())
    }

    /// Store a validated message, returning the id it is known by
    fn enqueue(&mut self, message: Message, now: Instant, dedup_window: Duration) -> MessageId {
        let mut dedup_key = None;

        if self.descriptor.is_fifo() {
            self.dedup
                .retain(|_, (_, seen_at)| now.duration_since(*seen_at) < dedup_window);

            if let Ok(key) = self.deduplication_id(&message) {
                if let Some((original, _)) = self.dedup.get(&key) {
                    tracing::debug!(
                        queue = %self.descriptor.name,
                        deduplication_id = %key,
                        message_id = %original,
                        "Duplicate send suppressed"
                    );
                    return original.clone();
                }
                dedup_key = Some(key);
            }
        }

        let message_id = MessageId::new();
        if let Some(key) = &dedup_key {
            self.dedup.insert(key.clone(), (message_id.clone(), now));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.pending.insert(
            sequence,
            StoredMessage {
                sequence,
                message_id: message_id.clone(),
                body: message.body,
                headers: message.headers,
                group_id: message.group_id,
                dedup_key,
                available_at: now + message.delay.unwrap_or_default(),
                receive_count: 0,
                first_received_at: None,
            },
        );

        message_id
    }

    /// Hand out up to `max` visible messages, honouring FIFO group locks
    fn take_available(
        &mut self,
        max: usize,
        now: Instant,
        visibility_timeout: Duration,
    ) -> Vec<MessageEnvelope> {
        self.reclaim_expired(now);

        let fifo = self.descriptor.is_fifo();
        let locked_groups: HashSet<MessageGroupId> = if fifo {
            self.in_flight
                .values()
                .filter_map(|m| m.message.group_id.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut blocked_groups = HashSet::new();
        let mut selected = Vec::new();

        for (sequence, message) in &self.pending {
            if selected.len() >= max {
                break;
            }

            if fifo {
                if let Some(group) = &message.group_id {
                    if locked_groups.contains(group) || blocked_groups.contains(group) {
                        continue;
                    }
                    if message.available_at > now {
                        // Later messages of the group must wait for this one
                        blocked_groups.insert(group.clone());
                        continue;
                    }
                }
            }

            if message.available_at <= now {
                selected.push(*sequence);
            }
        }

        let visibility = self
            .descriptor
            .visibility_timeout
            .unwrap_or(visibility_timeout);

        let mut envelopes = Vec::with_capacity(selected.len());
        for sequence in selected {
            let Some(mut message) = self.pending.remove(&sequence) else {
                continue;
            };

            message.receive_count += 1;
            let first_received_at = message
                .first_received_at
                .get_or_insert_with(Timestamp::now)
                .clone();

            let handle = uuid::Uuid::new_v4().to_string();
            envelopes.push(MessageEnvelope {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                headers: message.headers.clone(),
                receipt_handle: ReceiptHandle::new(
                    handle.clone(),
                    self.descriptor.name.clone(),
                    ProviderType::InMemory,
                ),
                group_id: message.group_id.clone(),
                dedup_key: message.dedup_key.clone(),
                receive_count: message.receive_count,
                first_received_at,
            });

            self.in_flight.insert(
                handle,
                InFlightMessage {
                    message,
                    visible_at: now + visibility,
                },
            );
        }

        envelopes
    }
}

/// A message stored in the queue with metadata
struct StoredMessage {
    sequence: u64,
    message_id: MessageId,
    body: Bytes,
    headers: HashMap<String, String>,
    group_id: Option<MessageGroupId>,
    dedup_key: Option<DeduplicationId>,
    available_at: Instant,
    receive_count: u32,
    first_received_at: Option<Timestamp>,
}

/// A message currently being processed
struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    storage: Arc<Mutex<QueueStorage>>,
    arrivals: Arc<Notify>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::new(config.clone()))),
            arrivals: Arc::new(Notify::new()),
            config,
        }
    }

    /// Create a queue. Declaring an existing queue again replaces its attributes.
    pub async fn declare_queue(&self, descriptor: QueueDescriptor) -> Result<(), QueueError> {
        descriptor.validate()?;

        let mut storage = self.storage.lock().await;
        match storage.queues.get_mut(&descriptor.name) {
            Some(queue) => queue.descriptor = descriptor,
            None => {
                tracing::debug!(
                    queue = %descriptor.name,
                    kind = ?descriptor.kind,
                    "Queue declared"
                );
                storage
                    .queues
                    .insert(descriptor.name.clone(), InMemoryQueue::new(descriptor));
            }
        }

        Ok(())
    }

    /// Number of messages waiting for delivery, delayed ones included
    pub async fn queue_depth(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let mut storage = self.storage.lock().await;
        let queue = storage.queue_mut(queue)?;
        queue.reclaim_expired(Instant::now());
        Ok(queue.pending.len())
    }

    /// Number of received messages that have been neither deleted nor reclaimed
    pub async fn in_flight_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let mut storage = self.storage.lock().await;
        let queue = storage.queue_mut(queue)?;
        queue.reclaim_expired(Instant::now());
        Ok(queue.in_flight.len())
    }

    async fn try_receive(
        &self,
        queue: &QueueName,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        let mut storage = self.storage.lock().await;
        let visibility_timeout = storage.config.visibility_timeout();
        let queue = storage.queue_mut(queue)?;
        Ok(queue.take_available(max_messages, Instant::now(), visibility_timeout))
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueService for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let dedup_window = self.config.deduplication_window();
        let message_id = {
            let mut storage = self.storage.lock().await;
            let queue = storage.queue_mut(queue)?;
            queue.validate(&message)?;
            queue.enqueue(message, Instant::now(), dedup_window)
        };

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        let max_size = self.max_batch_size() as usize;
        if messages.is_empty() {
            return Err(ValidationError::Required {
                field: "messages".to_string(),
            }
            .into());
        }
        if messages.len() > max_size {
            return Err(QueueError::BatchTooLarge {
                size: messages.len(),
                max_size,
            });
        }

        let total: usize = messages.iter().map(Message::encoded_size).sum();
        let max_bytes = self.provider_type().max_message_size();
        if total > max_bytes {
            return Err(QueueError::MessageTooLarge {
                size: total,
                max_size: max_bytes,
            });
        }

        let dedup_window = self.config.deduplication_window();
        let ids = {
            let mut storage = self.storage.lock().await;
            let queue = storage.queue_mut(queue)?;
            for message in &messages {
                queue.validate(message)?;
            }

            let now = Instant::now();
            messages
                .into_iter()
                .map(|message| queue.enqueue(message, now, dedup_window))
                .collect()
        };

        self.arrivals.notify_waiters();
        Ok(ids)
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        if max_messages == 0 || max_messages > self.max_batch_size() {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be 1-{}", self.max_batch_size()),
            }
            .into());
        }
        if wait_time > self.provider_type().max_wait_time() {
            return Err(ValidationError::OutOfRange {
                field: "wait_time".to_string(),
                message: "maximum 20 seconds".to_string(),
            }
            .into());
        }

        let deadline = Instant::now() + wait_time;
        loop {
            // Register interest before looking so a send in between is not missed
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let received = self.try_receive(queue, max_messages as usize).await?;
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }

            let tick = deadline.min(now + POLL_TICK);
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(tick) => {}
            }
        }
    }

    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        {
            let mut storage = self.storage.lock().await;
            let queue = storage.queue_mut(receipt.queue())?;
            if queue.in_flight.remove(receipt.handle()).is_none() {
                return Err(QueueError::MessageNotFound {
                    receipt: receipt.handle().to_string(),
                });
            }
        }

        // A deleted FIFO message may unlock its group for waiting receivers
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn delete_messages(
        &self,
        receipts: Vec<ReceiptHandle>,
    ) -> Result<BatchDeleteResult, QueueError> {
        let max_size = self.max_batch_size() as usize;
        if receipts.len() > max_size {
            return Err(QueueError::BatchTooLarge {
                size: receipts.len(),
                max_size,
            });
        }

        let mut result = BatchDeleteResult::default();
        for receipt in receipts {
            match self.delete_message(&receipt).await {
                Ok(()) => result.successful.push(receipt),
                Err(error) => result.failed.push(FailedDelete { receipt, error }),
            }
        }

        Ok(result)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
