//! Tests for the crate-level API surface.

use super::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_queue_name_validation() {
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("orders.fifo".to_string()).is_ok());

    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
    assert!(QueueName::new("a".repeat(81)).is_err());
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();
    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[tokio::test]
async fn test_producer_to_listener_through_root_exports() {
    let service = QueueServiceFactory::create_test_service();
    let queue: QueueName = "root-exports".parse().unwrap();
    let sink = Arc::new(ObservableSink::new());

    let mut builder = ListenerRegistry::builder();
    let handled = Arc::clone(&sink);
    builder.register_raw(
        ListenerConfig::new(QueueDescriptor::new(queue.clone()))
            .with_poll_timeout(Duration::from_millis(100)),
        move |delivery: Delivery<String>| {
            let handled = Arc::clone(&handled);
            async move {
                handled.append(delivery.payload);
                Ok(())
            }
        },
    );

    let handle = Dispatcher::new(service.clone(), builder.build().unwrap()).start();
    MessageProducer::new(service)
        .send(&queue, "hi", SendOptions::new())
        .await
        .unwrap();

    assert!(sink.wait_for_len(1, Duration::from_secs(2)).await);
    assert_eq!(sink.snapshot(), vec!["hi".to_string()]);
    handle.shutdown().await;
}
