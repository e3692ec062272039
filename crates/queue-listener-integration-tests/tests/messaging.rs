//! End-to-end tests for the demo listeners
//!
//! Every test publishes through [`ProducerService`] and asserts on what the
//! listeners recorded in the shared sinks.

mod common;

use common::{eventually, TestHarness, DELIVERY_WINDOW};
use queue_listener_runtime::LoopState;
use queue_listener_service::{DeviceTemperature, UNIQUE_ID_HEADER};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_string_is_delivered() {
    let harness = TestHarness::start().await;

    harness.producer.send_string("Hello, queue").await.unwrap();

    assert!(harness.sinks.strings.wait_for_len(1, DELIVERY_WINDOW).await);
    assert_eq!(harness.sinks.strings.snapshot(), vec!["Hello, queue".to_string()]);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unique_id_header_reaches_listener() {
    let harness = TestHarness::start().await;
    let unique_id = uuid::Uuid::new_v4().to_string();

    harness
        .producer
        .send_string_with_unique_id("with header", &unique_id)
        .await
        .unwrap();

    assert!(harness.sinks.strings.wait_for_len(1, DELIVERY_WINDOW).await);
    assert_eq!(harness.sinks.strings.last_header(UNIQUE_ID_HEADER), Some(unique_id));
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_of_ten_is_delivered_exactly_once() {
    let harness = TestHarness::start().await;
    let messages: Vec<String> = (0..10).map(|i| format!("batch message {i}")).collect();

    harness
        .producer
        .send_string_batch(messages.clone())
        .await
        .unwrap();

    assert!(harness.sinks.strings.wait_for_len(10, DELIVERY_WINDOW).await);
    // Nothing extra turns up afterwards
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut received = harness.sinks.strings.snapshot();
    received.sort();
    let mut expected = messages;
    expected.sort();
    assert_eq!(received, expected);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delayed_message_waits_for_its_delay() {
    let harness = TestHarness::start().await;

    harness
        .producer
        .send_string_with_delay("delayed", Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(
        harness.sinks.strings.is_empty(),
        "message must not arrive before its delay"
    );

    assert!(harness.sinks.strings.wait_for_len(1, DELIVERY_WINDOW).await);
    assert_eq!(harness.sinks.strings.snapshot(), vec!["delayed".to_string()]);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_listener_uses_exactly_five_workers() {
    let harness = TestHarness::start().await;

    for i in 0..50 {
        harness
            .producer
            .send_string_to_parallel(&format!("parallel {i}"))
            .await
            .unwrap();
    }

    assert!(
        harness
            .sinks
            .strings
            .wait_for_len(50, Duration::from_secs(5))
            .await
    );
    assert_eq!(harness.sinks.strings.distinct_workers(), vec![0, 1, 2, 3, 4]);

    let parallel = harness.queues.parallel.clone();
    assert!(eventually(DELIVERY_WINDOW, || harness.status(&parallel).acked == 50).await);
    let status = harness.status(&parallel);
    assert!(status.peak_in_flight <= 5, "peak was {}", status.peak_in_flight);
    assert_eq!(status.failed, 0);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_collapses_duplicates_but_not_case_variants() {
    let harness = TestHarness::start().await;

    for _ in 0..5 {
        harness.producer.send_string_to_fifo("same content").await.unwrap();
    }
    harness.producer.send_string_to_fifo("SAME CONTENT").await.unwrap();

    assert!(harness.sinks.strings.wait_for_len(2, DELIVERY_WINDOW).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        harness.sinks.strings.snapshot(),
        vec!["same content".to_string(), "SAME CONTENT".to_string()]
    );
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_device_temperatures_round_trip() {
    let harness = TestHarness::start().await;
    let readings: Vec<DeviceTemperature> = (0..5)
        .map(|i| DeviceTemperature::new(format!("device-{i}"), 18 + i))
        .collect();

    for reading in &readings {
        harness
            .producer
            .send_device_temperature(reading)
            .await
            .unwrap();
    }

    assert!(harness.sinks.temperatures.wait_for_len(5, DELIVERY_WINDOW).await);
    let received: HashSet<DeviceTemperature> =
        harness.sinks.temperatures.snapshot().into_iter().collect();
    let expected: HashSet<DeviceTemperature> = readings.into_iter().collect();
    assert_eq!(received, expected);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_drains_and_stops_every_loop() {
    let harness = TestHarness::start().await;
    let string_queue = harness.queues.string.clone();
    assert_ne!(harness.status(&string_queue).state, LoopState::Stopped);

    harness.producer.send_string("before stop").await.unwrap();
    assert!(harness.sinks.strings.wait_for_len(1, DELIVERY_WINDOW).await);
    assert!(eventually(DELIVERY_WINDOW, || harness.status(&string_queue).acked == 1).await);

    let sinks = harness.sinks.clone();
    harness.stop().await;

    assert_eq!(sinks.strings.snapshot(), vec!["before stop".to_string()]);
}
