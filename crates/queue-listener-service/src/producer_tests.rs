//! Tests for the demo producer.

use super::*;
use crate::config::QueueNames;
use queue_listener_runtime::{InMemoryConfig, InMemoryProvider};

async fn setup() -> (ProducerService, Arc<InMemoryProvider>, DemoQueues) {
    let queues = QueueNames::default().resolve().unwrap();
    let provider = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
    for descriptor in queues.descriptors() {
        provider.declare_queue(descriptor).await.unwrap();
    }

    let producer = ProducerService::new(provider.clone(), queues.clone());
    (producer, provider, queues)
}

#[tokio::test]
async fn test_each_send_targets_its_queue() {
    let (producer, provider, queues) = setup().await;

    producer.send_string("one").await.unwrap();
    producer.send_string_with_unique_id("two", "id-2").await.unwrap();
    producer
        .send_string_batch(vec!["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    producer.send_string_to_parallel("three").await.unwrap();
    producer.send_string_to_fifo("four").await.unwrap();
    producer
        .send_device_temperature(&DeviceTemperature::new("7", 30))
        .await
        .unwrap();

    assert_eq!(provider.queue_depth(&queues.string).await.unwrap(), 1);
    assert_eq!(provider.queue_depth(&queues.string_with_header).await.unwrap(), 1);
    assert_eq!(provider.queue_depth(&queues.string_batch).await.unwrap(), 2);
    assert_eq!(provider.queue_depth(&queues.parallel).await.unwrap(), 1);
    assert_eq!(provider.queue_depth(&queues.fifo).await.unwrap(), 1);
    assert_eq!(provider.queue_depth(&queues.device_temperature).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unique_id_travels_as_header() {
    let (producer, provider, queues) = setup().await;

    producer.send_string_with_unique_id("body", "abc-123").await.unwrap();

    let received = provider
        .receive_messages(&queues.string_with_header, 1, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(received[0].header(UNIQUE_ID_HEADER), Some("abc-123"));
}

#[tokio::test]
async fn test_fifo_duplicates_collapse() {
    let (producer, provider, queues) = setup().await;

    for _ in 0..5 {
        producer.send_string_to_fifo("valid sqs message").await.unwrap();
    }
    producer.send_string_to_fifo("VALID SQS MESSAGE").await.unwrap();

    assert_eq!(provider.queue_depth(&queues.fifo).await.unwrap(), 2);
}

#[tokio::test]
async fn test_delayed_send_is_not_immediately_visible() {
    let (producer, provider, queues) = setup().await;

    producer
        .send_string_with_delay("later", Duration::from_secs(1))
        .await
        .unwrap();

    let received = provider
        .receive_messages(&queues.delayed, 1, Duration::ZERO)
        .await
        .unwrap();
    assert!(received.is_empty());
}
