//! Shared harness for the end-to-end tests.
//!
//! Each test gets its own in-memory queue service with the seven demo
//! queues declared, all demo listeners running, and a producer.

#![allow(dead_code)]

use queue_listener_runtime::{DispatcherHandle, ListenerStatus, QueueName};
use queue_listener_service::{
    connect, start_listeners, DemoQueues, MessageSinks, ProducerService, ServiceConfig,
};
use std::time::Duration;

/// Upper bound for a message to travel from producer to sink
pub const DELIVERY_WINDOW: Duration = Duration::from_secs(2);

/// A running set of demo listeners
pub struct TestHarness {
    pub producer: ProducerService,
    pub sinks: MessageSinks,
    pub queues: DemoQueues,
    handle: Option<DispatcherHandle>,
}

impl TestHarness {
    pub async fn start() -> Self {
        Self::start_with(ServiceConfig::default()).await
    }

    pub async fn start_with(config: ServiceConfig) -> Self {
        let queues = config.queues.resolve().expect("default queues are valid");
        let service = connect(&config, &queues)
            .await
            .expect("in-memory provider connects");
        let sinks = MessageSinks::new();

        let handle = start_listeners(&config, &queues, service.clone(), &sinks)
            .expect("demo listeners register");

        Self {
            producer: ProducerService::new(service, queues.clone()),
            sinks,
            queues,
            handle: Some(handle),
        }
    }

    pub fn status(&self, queue: &QueueName) -> ListenerStatus {
        self.handle
            .as_ref()
            .and_then(|h| h.status(queue))
            .expect("listener is registered")
    }

    /// Stop listening and wait for in-flight handlers
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            assert!(
                handle.shutdown_timeout(Duration::from_secs(5)).await,
                "listeners should drain within 5s"
            );
        }
    }
}

/// Wait until `condition` holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
