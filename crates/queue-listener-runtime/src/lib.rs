//! # Queue Listener Runtime
//!
//! Listener runtime for SQS-style message queues, with AWS SQS and in-memory
//! providers behind one [`QueueService`] trait.
//!
//! This library provides:
//! - Listener registration for raw, typed and batch handlers
//! - Poll loops with bounded per-listener concurrency
//! - Per-group ordering for FIFO queues
//! - Redelivery of failed messages through visibility timeouts
//! - A producer facade and observable sinks for handled payloads
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for queue operations and handlers
//! - [`message`] - Queue names, messages and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - The queue service trait and its factory
//! - [`registry`] - Listener configuration and registration
//! - [`dispatcher`] - Poll loops, dispatch and shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use queue_listener_runtime::{
//!     Delivery, Dispatcher, ListenerConfig, ListenerRegistry, QueueDescriptor,
//!     QueueServiceFactory,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = QueueServiceFactory::create_test_service();
//! let queue = QueueDescriptor::new("greetings".parse()?);
//!
//! let mut builder = ListenerRegistry::builder();
//! builder.register_raw(ListenerConfig::new(queue), |delivery: Delivery<String>| async move {
//!     println!("received {}", delivery.payload);
//!     Ok(())
//! });
//!
//! let handle = Dispatcher::new(service, builder.build()?).start();
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod concurrency;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod ordering;
pub mod producer;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod sink;

// Re-export commonly used types at crate root for convenience
pub use client::{BatchDeleteResult, FailedDelete, QueueService, QueueServiceFactory};
pub use codec::{JsonCodec, PayloadCodec, RawStringCodec};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatchResult, ListenerStatus, LoopState};
pub use error::{
    ConfigurationError, HandlerError, QueueError, SerializationError, ValidationError,
};
pub use message::{
    DeduplicationId, Message, MessageEnvelope, MessageGroupId, MessageId, QueueDescriptor,
    QueueKind, QueueName, ReceiptHandle, SendOptions, Timestamp,
};
pub use producer::MessageProducer;
pub use provider::{AwsSqsConfig, InMemoryConfig, ProviderConfig, ProviderType, QueueServiceConfig};
pub use providers::{AwsError, AwsSqsProvider, InMemoryProvider};
pub use registry::{
    Delivery, ListenerConfig, ListenerRegistry, ListenerRegistryBuilder, PayloadType,
};
pub use retry::{RetryPolicy, RetryState};
pub use sink::ObservableSink;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
