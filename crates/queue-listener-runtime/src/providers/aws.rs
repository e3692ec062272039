//! AWS SQS provider implementation using the AWS SDK.
//!
//! ## Key Features
//!
//! - **Standard queues**: at-least-once delivery, best-effort ordering
//! - **FIFO queues**: ordering within message groups and deduplication,
//!   requires the `.fifo` suffix in the queue name
//! - **Headers**: carried as `String` message attributes
//! - **Batch operations**: up to 10 entries per send or delete
//! - **Queue URL caching**: one `GetQueueUrl` call per queue
//!
//! ## Authentication
//!
//! Static keys from [`AwsSqsConfig`] are used when both are present; otherwise
//! the default AWS credential chain applies. An `endpoint_url` override points
//! the client at LocalStack or ElasticMQ.
//!
//! ## Example
//!
//! ```no_run
//! use queue_listener_runtime::{
//!     AwsSqsConfig, ProviderConfig, QueueServiceConfig, QueueServiceFactory,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueServiceConfig {
//!     provider: ProviderConfig::AwsSqs(AwsSqsConfig {
//!         region: "us-east-1".to_string(),
//!         endpoint_url: Some("http://localhost:4566".to_string()),
//!         access_key_id: Some("test".to_string()),
//!         secret_access_key: Some("test".to_string()),
//!     }),
//! };
//!
//! let service = QueueServiceFactory::create(config).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{BatchDeleteResult, FailedDelete, QueueService};
use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::message::{
    DeduplicationId, Message, MessageEnvelope, MessageGroupId, MessageId, QueueName,
    ReceiptHandle, Timestamp, MAX_DELAY,
};
use crate::provider::{AwsSqsConfig, ProviderType};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{
    DeleteMessageBatchRequestEntry, Message as SqsMessage, MessageAttributeValue,
    MessageSystemAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client as SqsClient;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AwsError {
    /// Classify an SQS error code
    pub fn from_code(code: &str, message: &str, queue: &str) -> Self {
        match code {
            "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
                Self::QueueNotFound(queue.to_string())
            }
            "InvalidClientTokenId"
            | "UnrecognizedClientException"
            | "SignatureDoesNotMatch"
            | "AccessDenied"
            | "AccessDeniedException" => Self::Authentication(format!("{}: {}", code, message)),
            "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => {
                Self::InvalidReceipt(message.to_string())
            }
            "InvalidParameterValue"
            | "MissingParameter"
            | "InvalidMessageContents"
            | "InvalidAttributeValue"
            | "BatchEntryIdsNotDistinct"
            | "EmptyBatchRequest" => Self::InvalidRequest(format!("{}: {}", code, message)),
            _ => Self::ServiceError {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    /// Classify a failed SDK call
    pub fn from_sdk<E, R>(error: SdkError<E, R>, queue: &str) -> Self
    where
        E: ProvideErrorMetadata,
    {
        match error {
            SdkError::ServiceError(context) => {
                let err = context.err();
                Self::from_code(
                    err.code().unwrap_or("Unknown"),
                    err.message().unwrap_or("Unknown error"),
                    queue,
                )
            }
            SdkError::TimeoutError(_) => Self::NetworkError("request timed out".to_string()),
            SdkError::DispatchFailure(failure) => Self::NetworkError(format!("{:?}", failure)),
            other => Self::ServiceError {
                code: "SdkError".to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::ServiceError { .. } => true, // Most SQS errors are transient
            Self::QueueNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::ConfigurationError(_) => false,
            Self::InvalidRequest(_) => false,
        }
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: ProviderType::AwsSqs.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_name: queue },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::InvalidRequest(msg) => {
                QueueError::ValidationError(ValidationError::InvalidFormat {
                    field: "request".to_string(),
                    message: msg,
                })
            }
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(error: AwsError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Convert headers into `String` message attributes
fn headers_to_attributes(
    headers: &HashMap<String, String>,
) -> Result<Option<HashMap<String, MessageAttributeValue>>, AwsError> {
    if headers.is_empty() {
        return Ok(None);
    }

    let mut attributes = HashMap::with_capacity(headers.len());
    for (key, value) in headers {
        let attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| AwsError::InvalidRequest(format!("attribute '{}': {}", key, e)))?;
        attributes.insert(key.clone(), attribute);
    }

    Ok(Some(attributes))
}

fn body_to_string(body: &Bytes) -> Result<String, SerializationError> {
    String::from_utf8(body.to_vec()).map_err(|_| SerializationError::InvalidUtf8)
}

fn delay_seconds(delay: Option<Duration>) -> Result<Option<i32>, ValidationError> {
    match delay {
        None => Ok(None),
        Some(delay) if delay > MAX_DELAY => Err(ValidationError::OutOfRange {
            field: "delay".to_string(),
            message: format!("maximum {} seconds", MAX_DELAY.as_secs()),
        }),
        Some(delay) => Ok(Some(delay.as_secs() as i32)),
    }
}

/// Build an envelope from a received SQS message
fn envelope_from_sqs(message: &SqsMessage, queue: &QueueName) -> Result<MessageEnvelope, AwsError> {
    let receipt = message
        .receipt_handle()
        .ok_or_else(|| AwsError::InvalidReceipt("message without receipt handle".to_string()))?;

    let message_id = message
        .message_id()
        .and_then(|id| MessageId::from_str(id).ok())
        .unwrap_or_default();

    let system = message.attributes();
    let system_attribute =
        |name: MessageSystemAttributeName| system.and_then(|attrs| attrs.get(&name));

    let receive_count = system_attribute(MessageSystemAttributeName::ApproximateReceiveCount)
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    let first_received_at =
        system_attribute(MessageSystemAttributeName::ApproximateFirstReceiveTimestamp)
            .and_then(|millis| millis.parse::<i64>().ok())
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(Timestamp::from_datetime)
            .unwrap_or_else(Timestamp::now);

    let group_id = system_attribute(MessageSystemAttributeName::MessageGroupId)
        .and_then(|id| MessageGroupId::new(id.clone()).ok());
    let dedup_key = system_attribute(MessageSystemAttributeName::MessageDeduplicationId)
        .and_then(|id| DeduplicationId::new(id.clone()).ok());

    let headers = message
        .message_attributes()
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|(key, value)| {
                    value
                        .string_value()
                        .map(|v| (key.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(MessageEnvelope {
        message_id,
        body: Bytes::from(message.body().unwrap_or_default().to_string()),
        headers,
        receipt_handle: ReceiptHandle::new(
            receipt.to_string(),
            queue.clone(),
            ProviderType::AwsSqs,
        ),
        group_id,
        dedup_key,
        receive_count,
        first_received_at,
    })
}

// ============================================================================
// AwsSqsProvider
// ============================================================================

/// AWS SQS queue provider
///
/// The provider is thread-safe and can be shared across async tasks using `Arc`.
/// Internal state (queue URL cache) is protected by `RwLock`.
pub struct AwsSqsProvider {
    client: SqsClient,
    config: AwsSqsConfig,
    queue_url_cache: Arc<RwLock<HashMap<QueueName, String>>>,
}

impl AwsSqsProvider {
    /// Create new AWS SQS provider
    ///
    /// # Errors
    ///
    /// Returns error if the region is empty or only one half of a static key
    /// pair is configured.
    pub async fn new(config: AwsSqsConfig) -> Result<Self, AwsError> {
        if config.region.is_empty() {
            return Err(AwsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "queue-listener-config",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(AwsError::ConfigurationError(
                    "access_key_id and secret_access_key must be set together".to_string(),
                ))
            }
        }

        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        tracing::debug!(
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "SQS client configured"
        );

        Ok(Self {
            client: SqsClient::new(&sdk_config),
            config,
            queue_url_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get queue URL for a queue name, with caching
    async fn get_queue_url(&self, queue_name: &QueueName) -> Result<String, AwsError> {
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(queue_name) {
                return Ok(url.clone());
            }
        }

        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name.as_str())
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, queue_name.as_str()))?;

        let queue_url = output
            .queue_url()
            .ok_or_else(|| AwsError::QueueNotFound(queue_name.to_string()))?
            .to_string();

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(queue_name.clone(), queue_url.clone());

        Ok(queue_url)
    }

    async fn delete_batch_for_queue(
        &self,
        queue: &QueueName,
        receipts: Vec<ReceiptHandle>,
        result: &mut BatchDeleteResult,
    ) -> Result<(), QueueError> {
        let queue_url = self.get_queue_url(queue).await?;

        let mut entries = Vec::with_capacity(receipts.len());
        for (index, receipt) in receipts.iter().enumerate() {
            let entry = DeleteMessageBatchRequestEntry::builder()
                .id(index.to_string())
                .receipt_handle(receipt.handle())
                .build()
                .map_err(|e| AwsError::InvalidRequest(e.to_string()))?;
            entries.push(entry);
        }

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, queue.as_str()))?;

        let mut by_id: HashMap<String, ReceiptHandle> = receipts
            .into_iter()
            .enumerate()
            .map(|(index, receipt)| (index.to_string(), receipt))
            .collect();

        for entry in output.successful() {
            if let Some(receipt) = by_id.remove(entry.id()) {
                result.successful.push(receipt);
            }
        }

        for entry in output.failed() {
            if let Some(receipt) = by_id.remove(entry.id()) {
                let error = AwsError::from_code(
                    entry.code(),
                    entry.message().unwrap_or("delete failed"),
                    queue.as_str(),
                );
                result.failed.push(FailedDelete {
                    receipt,
                    error: error.into(),
                });
            }
        }

        // Entries SQS did not mention are treated as failed so they are retried
        for (_, receipt) in by_id {
            result.failed.push(FailedDelete {
                receipt,
                error: QueueError::ProviderError {
                    provider: ProviderType::AwsSqs.to_string(),
                    code: "MissingResult".to_string(),
                    message: "no result reported for batch entry".to_string(),
                },
            });
        }

        Ok(())
    }
}

impl fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsProvider")
            .field("region", &self.config.region)
            .field("endpoint_url", &self.config.endpoint_url)
            .field("has_static_credentials", &self.config.access_key_id.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueService for AwsSqsProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = self.provider_type().max_message_size();
        let size = message.encoded_size();
        if size > max_size {
            return Err(QueueError::MessageTooLarge { size, max_size });
        }

        let queue_url = self.get_queue_url(queue).await?;
        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body_to_string(&message.body)?)
            .set_delay_seconds(delay_seconds(message.delay)?)
            .set_message_attributes(headers_to_attributes(&message.headers)?)
            .set_message_group_id(message.group_id.map(|g| g.as_str().to_string()))
            .set_message_deduplication_id(
                message.deduplication_id.map(|d| d.as_str().to_string()),
            )
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, queue.as_str()))?;

        let message_id = output
            .message_id()
            .and_then(|id| MessageId::from_str(id).ok())
            .unwrap_or_default();

        tracing::debug!(queue = %queue, message_id = %message_id, "Message sent to SQS");
        Ok(message_id)
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        let max_size = self.max_batch_size() as usize;
        if messages.len() > max_size {
            return Err(QueueError::BatchTooLarge {
                size: messages.len(),
                max_size,
            });
        }
        if messages.is_empty() {
            return Err(ValidationError::Required {
                field: "messages".to_string(),
            }
            .into());
        }

        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let entry = SendMessageBatchRequestEntry::builder()
                .id(index.to_string())
                .message_body(body_to_string(&message.body)?)
                .set_delay_seconds(delay_seconds(message.delay)?)
                .set_message_attributes(headers_to_attributes(&message.headers)?)
                .set_message_group_id(message.group_id.as_ref().map(|g| g.as_str().to_string()))
                .set_message_deduplication_id(
                    message
                        .deduplication_id
                        .as_ref()
                        .map(|d| d.as_str().to_string()),
                )
                .build()
                .map_err(|e| AwsError::InvalidRequest(e.to_string()))?;
            entries.push(entry);
        }

        let queue_url = self.get_queue_url(queue).await?;
        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, queue.as_str()))?;

        if let Some(failed) = output.failed().first() {
            return Err(AwsError::from_code(
                failed.code(),
                failed.message().unwrap_or("batch entry rejected"),
                queue.as_str(),
            )
            .into());
        }

        // Results come back unordered; restore the order of the request
        let mut ids: Vec<Option<MessageId>> = vec![None; messages.len()];
        for entry in output.successful() {
            if let Ok(index) = entry.id().parse::<usize>() {
                if let Some(slot) = ids.get_mut(index) {
                    *slot = MessageId::from_str(entry.message_id()).ok();
                }
            }
        }

        Ok(ids.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        let queue_url = self.get_queue_url(queue).await?;
        let wait_seconds = wait_time
            .as_secs()
            .min(self.provider_type().max_wait_time().as_secs());

        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.clamp(1, self.max_batch_size()) as i32)
            .wait_time_seconds(wait_seconds as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, queue.as_str()))?;

        let mut envelopes = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            match envelope_from_sqs(message, queue) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Skipping malformed SQS message");
                }
            }
        }

        Ok(envelopes)
    }

    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let queue_url = self.get_queue_url(receipt.queue()).await?;

        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt.handle())
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(e, receipt.queue().as_str()))?;

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

        let mut by_queue: HashMap<QueueName, Vec<ReceiptHandle>> = HashMap::new();
        for receipt in receipts {
            by_queue
                .entry(receipt.queue().clone())
                .or_default()
                .push(receipt);
        }

        let mut result = BatchDeleteResult::default();
        for (queue, receipts) in by_queue {
            self.delete_batch_for_queue(&queue, receipts, &mut result)
                .await?;
        }

        Ok(result)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}
