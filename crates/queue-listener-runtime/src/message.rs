//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Longest queue name accepted by SQS-compatible services
pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Suffix that marks a queue as FIFO
pub const FIFO_SUFFIX: &str = ".fifo";

/// Longest delivery delay a queue service will honour
pub const MAX_DELAY: Duration = Duration::from_secs(900);

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);

        if base.is_empty() || name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        // The `.fifo` suffix is the only place a dot may appear
        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Delivery semantics of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// At-least-once, unordered delivery
    Standard,
    /// Ordered within a message group, with deduplication
    Fifo,
}

/// Everything a listener or producer needs to know about a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub name: QueueName,
    pub kind: QueueKind,
    /// Derive deduplication ids from the message body (FIFO only)
    pub content_based_deduplication: bool,
    /// Overrides the service default visibility timeout
    pub visibility_timeout: Option<Duration>,
}

impl QueueDescriptor {
    /// Describe a queue, inferring its kind from the name suffix
    pub fn new(name: QueueName) -> Self {
        let kind = if name.is_fifo() {
            QueueKind::Fifo
        } else {
            QueueKind::Standard
        };

        Self {
            name,
            kind,
            content_based_deduplication: false,
            visibility_timeout: None,
        }
    }

    /// Enable or disable content-based deduplication
    pub fn with_content_based_deduplication(mut self, enabled: bool) -> Self {
        self.content_based_deduplication = enabled;
        self
    }

    /// Set the visibility timeout for received messages
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Check that kind, name and attributes agree
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.kind {
            QueueKind::Fifo if !self.name.is_fifo() => Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: format!("FIFO queue names must end with '{}'", FIFO_SUFFIX),
            }),
            QueueKind::Standard if self.name.is_fifo() => Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: format!("standard queue names must not end with '{}'", FIFO_SUFFIX),
            }),
            QueueKind::Standard if self.content_based_deduplication => {
                Err(ValidationError::InvalidFormat {
                    field: "content_based_deduplication".to_string(),
                    message: "only FIFO queues support content-based deduplication".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn is_fifo(&self) -> bool {
        self.kind == QueueKind::Fifo
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Identifier for grouping related messages for ordered processing on FIFO queues
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageGroupId(String);

impl MessageGroupId {
    /// Group used by producers when the caller does not name one
    pub const DEFAULT: &'static str = "default";

    /// Create new group ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        validate_token("message_group_id", &id)?;
        Ok(Self(id))
    }

    /// The group assigned to FIFO messages sent without an explicit group
    pub fn default_group() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Get group ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageGroupId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Token used by FIFO queues to suppress duplicate sends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeduplicationId(String);

impl DeduplicationId {
    /// Create new deduplication ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        validate_token("deduplication_id", &id)?;
        Ok(Self(id))
    }

    /// Derive the ID from message content, as content-based deduplication does
    pub fn from_content(body: &[u8]) -> Self {
        use sha2::{Digest, Sha256};

        Self(hex::encode(Sha256::digest(body)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeduplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Group and deduplication ids share the SQS token rules
fn validate_token(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > 128 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: "maximum 128 characters".to_string(),
        });
    }

    if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII printable characters allowed".to_string(),
        });
    }

    Ok(())
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue service
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub headers: HashMap<String, String>,
    pub group_id: Option<MessageGroupId>,
    pub deduplication_id: Option<DeduplicationId>,
    pub delay: Option<Duration>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            headers: HashMap::new(),
            group_id: None,
            deduplication_id: None,
            delay: None,
        }
    }

    /// Add a header, carried as a message attribute
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add group ID for ordered processing
    pub fn with_group_id(mut self, group_id: MessageGroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Set an explicit deduplication ID
    pub fn with_deduplication_id(mut self, id: DeduplicationId) -> Self {
        self.deduplication_id = Some(id);
        self
    }

    /// Defer visibility of the message to consumers
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Body size as the queue service measures it (body plus attributes)
    pub fn encoded_size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// A message received from a queue, owned by the poll cycle that fetched it
/// until it is deleted or its visibility timeout lapses
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub message_id: MessageId,
    pub body: Bytes,
    pub headers: HashMap<String, String>,
    pub receipt_handle: ReceiptHandle,
    pub group_id: Option<MessageGroupId>,
    pub dedup_key: Option<DeduplicationId>,
    pub receive_count: u32,
    pub first_received_at: Timestamp,
}

impl MessageEnvelope {
    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Whether this delivery is a retry of an earlier, unacknowledged one
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Opaque token for acknowledging received messages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    handle: String,
    queue: QueueName,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, queue: QueueName, provider_type: ProviderType) -> Self {
        Self {
            handle,
            queue,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Queue the message was received from
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Send Options
// ============================================================================

/// Configuration options for sending messages to queues
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Headers carried as message attributes
    pub headers: HashMap<String, String>,
    /// Delay before the message becomes visible to consumers
    pub delay: Option<Duration>,
    /// Group ID for ordered processing on FIFO queues
    pub group_id: Option<MessageGroupId>,
    /// Explicit deduplication ID for FIFO queues
    pub deduplication_id: Option<DeduplicationId>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set scheduled delivery with a delay from now
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set group ID for ordered processing
    pub fn with_group_id(mut self, group_id: MessageGroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Set duplicate detection ID
    pub fn with_deduplication_id(mut self, id: DeduplicationId) -> Self {
        self.deduplication_id = Some(id);
        self
    }

    /// Build the outgoing message for `body`
    pub fn into_message(self, body: Bytes) -> Message {
        Message {
            body,
            headers: self.headers,
            group_id: self.group_id,
            deduplication_id: self.deduplication_id,
            delay: self.delay,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
