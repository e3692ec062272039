//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!QueueError::QueueNotFound {
        queue_name: "test".to_string(),
    }
    .is_transient());

    assert!(QueueError::ProviderError {
        provider: "AwsSqs".to_string(),
        code: "ServiceUnavailable".to_string(),
        message: "try again".to_string(),
    }
    .is_transient());

    assert!(!QueueError::MessageTooLarge {
        size: 1000,
        max_size: 500
    }
    .is_transient());
}

#[test]
fn test_retry_suggestions() {
    let timeout = QueueError::Timeout {
        duration: Duration::seconds(20),
    };
    assert_eq!(timeout.retry_after(), Some(Duration::seconds(1)));

    let not_found = QueueError::QueueNotFound {
        queue_name: "test".to_string(),
    };
    assert_eq!(not_found.retry_after(), None);
}

#[test]
fn test_configuration_errors_are_not_transient() {
    let error: QueueError = ConfigurationError::DuplicateListener {
        queue_name: "orders".to_string(),
    }
    .into();

    assert!(!error.is_transient());
    assert!(error.to_string().contains("orders"));
}

#[test]
fn test_handler_error_from_serialization_error() {
    let error: HandlerError = SerializationError::InvalidUtf8.into();

    assert!(matches!(error, HandlerError::Deserialization(_)));
}

#[test]
fn test_partial_batch_message_counts_failures() {
    let error = HandlerError::PartialBatch {
        failed: vec![
            crate::message::MessageId::new(),
            crate::message::MessageId::new(),
        ],
        message: "two records rejected".to_string(),
    };

    assert!(error.to_string().contains("2 message(s)"));
}
