//! Tests for in-memory queue provider.

use super::*;
use crate::provider::InMemoryConfig;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

async fn provider_with(descriptor: QueueDescriptor) -> InMemoryProvider {
    let provider = InMemoryProvider::default();
    provider.declare_queue(descriptor).await.unwrap();
    provider
}

fn text(body: &str) -> Message {
    Message::new(Bytes::from(body.to_string()))
}

fn grouped(body: &str, group: &str) -> Message {
    text(body).with_group_id(MessageGroupId::new(group.to_string()).unwrap())
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    #[tokio::test]
    async fn test_unknown_queue_is_rejected() {
        let provider = InMemoryProvider::default();

        let result = provider.send_message(&queue("missing"), text("x")).await;

        match result {
            Err(QueueError::QueueNotFound { queue_name }) => assert_eq!(queue_name, "missing"),
            other => panic!("Expected QueueNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auto_create_queues() {
        let provider = InMemoryProvider::new(InMemoryConfig {
            auto_create_queues: true,
            ..Default::default()
        });

        provider.send_message(&queue("fresh"), text("x")).await.unwrap();

        assert_eq!(provider.queue_depth(&queue("fresh")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_declare_rejects_invalid_descriptor() {
        let provider = InMemoryProvider::default();
        let descriptor =
            QueueDescriptor::new(queue("standard")).with_content_based_deduplication(true);

        assert!(provider.declare_queue(descriptor).await.is_err());
    }
}

// ============================================================================
// Send / Receive Tests
// ============================================================================

mod send_receive {
    use super::*;

    #[tokio::test]
    async fn test_send_then_receive_preserves_body_and_headers() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        let sent_id = provider
            .send_message(&queue("q"), text("hello").with_header("uniqueId", "abc"))
            .await
            .unwrap();

        let received = provider
            .receive_messages(&queue("q"), 10, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(received.len(), 1);
        let envelope = &received[0];
        assert_eq!(envelope.message_id, sent_id);
        assert_eq!(envelope.body, Bytes::from_static(b"hello"));
        assert_eq!(envelope.header("uniqueId"), Some("abc"));
        assert_eq!(envelope.receive_count, 1);
        assert_eq!(envelope.receipt_handle.queue(), &queue("q"));
    }

    #[tokio::test]
    async fn test_receive_from_empty_queue_waits_then_returns_empty() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        let started = Instant::now();

        let received = provider
            .receive_messages(&queue("q"), 10, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(received.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let provider = Arc::new(provider_with(QueueDescriptor::new(queue("q"))).await);
        let receiver = Arc::clone(&provider);

        let handle = tokio::spawn(async move {
            receiver
                .receive_messages(&queue("q"), 1, Duration::from_secs(10))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        provider.send_message(&queue("q"), text("late")).await.unwrap();

        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_receive_respects_max_messages_and_order() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        for i in 0..5 {
            provider
                .send_message(&queue("q"), text(&format!("m{i}")))
                .await
                .unwrap();
        }

        let first = provider
            .receive_messages(&queue("q"), 3, Duration::ZERO)
            .await
            .unwrap();
        let second = provider
            .receive_messages(&queue("q"), 3, Duration::ZERO)
            .await
            .unwrap();

        let bodies: Vec<_> = first.iter().chain(&second).map(|e| e.body.clone()).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert_eq!(bodies[0], Bytes::from_static(b"m0"));
        assert_eq!(bodies[4], Bytes::from_static(b"m4"));
    }

    #[tokio::test]
    async fn test_receive_validates_arguments() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;

        assert!(provider
            .receive_messages(&queue("q"), 0, Duration::ZERO)
            .await
            .is_err());
        assert!(provider
            .receive_messages(&queue("q"), 11, Duration::ZERO)
            .await
            .is_err());
        assert!(provider
            .receive_messages(&queue("q"), 1, Duration::from_secs(21))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delayed_message_is_invisible_until_due() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        provider
            .send_message(&queue("q"), text("later").with_delay(Duration::from_millis(300)))
            .await
            .unwrap();

        let early = provider
            .receive_messages(&queue("q"), 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(early.is_empty());
        assert_eq!(provider.queue_depth(&queue("q")).await.unwrap(), 1);

        let late = provider
            .receive_messages(&queue("q"), 10, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(late.len(), 1);
    }

    #[tokio::test]
    async fn test_delay_above_maximum_is_rejected() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;

        let result = provider
            .send_message(&queue("q"), text("x").with_delay(Duration::from_secs(901)))
            .await;

        assert!(matches!(result, Err(QueueError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        let body = "x".repeat(256 * 1024 + 1);

        let result = provider.send_message(&queue("q"), text(&body)).await;

        assert!(matches!(result, Err(QueueError::MessageTooLarge { .. })));
    }
}

// ============================================================================
// Batch Tests
// ============================================================================

mod batches {
    use super::*;

    #[tokio::test]
    async fn test_send_batch_returns_ids_in_order() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        let messages = (0..10).map(|i| text(&i.to_string())).collect();

        let ids = provider.send_messages(&queue("q"), messages).await.unwrap();

        assert_eq!(ids.len(), 10);
        let received = provider
            .receive_messages(&queue("q"), 10, Duration::ZERO)
            .await
            .unwrap();
        let received_ids: Vec<_> = received.iter().map(|e| e.message_id.clone()).collect();
        assert_eq!(received_ids, ids);
    }

    #[tokio::test]
    async fn test_send_batch_limits() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;

        let too_many = (0..11).map(|i| text(&i.to_string())).collect();
        assert!(matches!(
            provider.send_messages(&queue("q"), too_many).await,
            Err(QueueError::BatchTooLarge { size: 11, max_size: 10 })
        ));

        assert!(provider.send_messages(&queue("q"), Vec::new()).await.is_err());
        assert_eq!(provider.queue_depth(&queue("q")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_with_invalid_entry_stores_nothing() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        let messages = vec![
            text("ok"),
            text("bad").with_delay(Duration::from_secs(1000)),
        ];

        assert!(provider.send_messages(&queue("q"), messages).await.is_err());
        assert_eq!(provider.queue_depth(&queue("q")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_messages_reports_each_entry() {
        let provider = provider_with(QueueDescriptor::new(queue("q"))).await;
        provider
            .send_messages(&queue("q"), vec![text("a"), text("b")])
            .await
            .unwrap();
        let received = provider
            .receive_messages(&queue("q"), 10, Duration::ZERO)
            .await
            .unwrap();

        let mut receipts: Vec<_> = received.into_iter().map(|e| e.receipt_handle).collect();
        receipts.push(ReceiptHandle::new(
            "stale".to_string(),
            queue("q"),
            ProviderType::InMemory,
        ));

        let result = provider.delete_messages(receipts).await.unwrap();

        assert_eq!(result.successful.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].receipt.handle(), "stale");
        assert!(!result.is_complete());
        assert_eq!(provider.in_flight_count(&queue("q")).await.unwrap(), 0);
    }
}

// ============================================================================
// Visibility Timeout Tests
// ============================================================================

mod visibility {
    use super::*;

    #[tokio::test]
    async fn test_deleted_message_is_not_redelivered() {
        let descriptor =
            QueueDescriptor::new(queue("q")).with_visibility_timeout(Duration::from_millis(100));
        let provider = provider_with(descriptor).await;
        provider.send_message(&queue("q"), text("once")).await.unwrap();

        let received = provider
            .receive_messages(&queue("q"), 1, Duration::ZERO)
            .await
            .unwrap();
        provider
            .delete_message(&received[0].receipt_handle)
            .await
            .unwrap();

        let again = provider
            .receive_messages(&queue("q"), 1, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered_with_higher_count() {
        let descriptor =
            QueueDescriptor::new(queue("q")).with_visibility_timeout(Duration::from_millis(100));
        let provider = provider_with(descriptor).await;
        let sent = provider.send_message(&queue("q"), text("retry")).await.unwrap();

        let first = provider
            .receive_messages(&queue("q"), 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(provider.in_flight_count(&queue("q")).await.unwrap(), 1);

        let second = provider
            .receive_messages(&queue("q"), 1, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, sent);
        assert_eq!(second[0].receive_count, 2);
        assert!(second[0].is_redelivery());
        assert_eq!(second[0].first_received_at, first[0].first_received_at);
        assert_ne!(
            second[0].receipt_handle.handle(),
            first[0].receipt_handle.handle()
        );
    }

    #[tokio::test]
    async fn test_delete_with_expired_receipt_fails() {
        let descriptor =
            QueueDescriptor::new(queue("q")).with_visibility_timeout(Duration::from_millis(50));
        let provider = provider_with(descriptor).await;
        provider.send_message(&queue("q"), text("x")).await.unwrap();

        let first = provider
            .receive_messages(&queue("q"), 1, Duration::ZERO)
            .await
            .unwrap();
        let _second = provider
            .receive_messages(&queue("q"), 1, Duration::from_secs(1))
            .await
            .unwrap();

        let result = provider.delete_message(&first[0].receipt_handle).await;
        assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
    }
}

// ============================================================================
// FIFO Tests
// ============================================================================

mod fifo {
    use super::*;

    fn fifo_descriptor() -> QueueDescriptor {
        QueueDescriptor::new(queue("events.fifo")).with_content_based_deduplication(true)
    }

    #[tokio::test]
    async fn test_content_based_deduplication_returns_original_id() {
        let provider = provider_with(fifo_descriptor()).await;
        let q = queue("events.fifo");

        let first = provider.send_message(&q, grouped("dup", "g")).await.unwrap();
        let second = provider.send_message(&q, grouped("dup", "g")).await.unwrap();
        let other = provider.send_message(&q, grouped("DUP", "g")).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(provider.queue_depth(&q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_deduplication_holds_after_delivery() {
        let provider = provider_with(fifo_descriptor()).await;
        let q = queue("events.fifo");

        provider.send_message(&q, grouped("dup", "g")).await.unwrap();
        let received = provider.receive_messages(&q, 10, Duration::ZERO).await.unwrap();
        provider
            .delete_message(&received[0].receipt_handle)
            .await
            .unwrap();
        provider.send_message(&q, grouped("dup", "g")).await.unwrap();

        assert_eq!(provider.queue_depth(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deduplication_window_expires() {
        let provider = InMemoryProvider::new(InMemoryConfig {
            deduplication_window_seconds: 0,
            ..Default::default()
        });
        provider.declare_queue(fifo_descriptor()).await.unwrap();
        let q = queue("events.fifo");

        let first = provider.send_message(&q, grouped("dup", "g")).await.unwrap();
        let second = provider.send_message(&q, grouped("dup", "g")).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_explicit_deduplication_id_wins_over_content() {
        let provider = provider_with(fifo_descriptor()).await;
        let q = queue("events.fifo");
        let dedup = DeduplicationId::new("order-1".to_string()).unwrap();

        let first = provider
            .send_message(&q, grouped("a", "g").with_deduplication_id(dedup.clone()))
            .await
            .unwrap();
        let second = provider
            .send_message(&q, grouped("b", "g").with_deduplication_id(dedup.clone()))
            .await
            .unwrap();

        assert_eq!(first, second);
        let received = provider.receive_messages(&q, 10, Duration::ZERO).await.unwrap();
        assert_eq!(received[0].dedup_key, Some(dedup));
    }

    #[tokio::test]
    async fn test_fifo_send_requirements() {
        let provider = provider_with(QueueDescriptor::new(queue("plain.fifo"))).await;
        let q = queue("plain.fifo");

        // Group is mandatory
        assert!(provider.send_message(&q, text("x")).await.is_err());
        // No content dedup, so an explicit id is mandatory
        assert!(provider.send_message(&q, grouped("x", "g")).await.is_err());
        // Per-message delays are not allowed
        let delayed = grouped("x", "g")
            .with_deduplication_id(DeduplicationId::new("d".to_string()).unwrap())
            .with_delay(Duration::from_secs(1));
        assert!(provider.send_message(&q, delayed).await.is_err());
    }

    #[tokio::test]
    async fn test_group_is_locked_while_in_flight() {
        let provider = provider_with(fifo_descriptor()).await;
        let q = queue("events.fifo");
        provider.send_message(&q, grouped("a1", "a")).await.unwrap();
        provider.send_message(&q, grouped("a2", "a")).await.unwrap();
        provider.send_message(&q, grouped("b1", "b")).await.unwrap();

        let first = provider.receive_messages(&q, 1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].body, Bytes::from_static(b"a1"));

        // Group "a" is locked, so only "b1" is eligible
        let second = provider.receive_messages(&q, 10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, Bytes::from_static(b"b1"));

        provider
            .delete_message(&first[0].receipt_handle)
            .await
            .unwrap();
        let third = provider.receive_messages(&q, 10, Duration::ZERO).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].body, Bytes::from_static(b"a2"));
    }

    #[tokio::test]
    async fn test_group_order_preserved_on_redelivery() {
        let descriptor = fifo_descriptor().with_visibility_timeout(Duration::from_millis(100));
        let provider = provider_with(descriptor).await;
        let q = queue("events.fifo");
        provider
            .send_messages(&q, vec![grouped("1", "g"), grouped("2", "g"), grouped("3", "g")])
            .await
            .unwrap();

        let first = provider.receive_messages(&q, 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 3);

        // Only the first one is acknowledged; the rest must come back in order
        provider
            .delete_message(&first[0].receipt_handle)
            .await
            .unwrap();
        let redelivered = provider
            .receive_messages(&q, 10, Duration::from_secs(2))
            .await
            .unwrap();

        let bodies: Vec<_> = redelivered.iter().map(|e| e.body.clone()).collect();
        assert_eq!(
            bodies,
            vec![Bytes::from_static(b"2"), Bytes::from_static(b"3")]
        );
    }
}
