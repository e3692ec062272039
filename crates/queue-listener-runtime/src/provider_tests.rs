//! Tests for provider types.

use super::*;

#[test]
fn test_provider_limits_match_sqs() {
    for provider in [ProviderType::AwsSqs, ProviderType::InMemory] {
        assert_eq!(provider.max_batch_size(), 10);
        assert_eq!(provider.max_message_size(), 256 * 1024);
        assert_eq!(provider.max_wait_time(), Duration::from_secs(20));
    }
}

#[test]
fn test_in_memory_config_defaults() {
    let config = InMemoryConfig::default();
    assert_eq!(config.visibility_timeout(), Duration::from_secs(30));
    assert_eq!(config.deduplication_window(), Duration::from_secs(300));
    assert!(!config.auto_create_queues);
}

#[test]
fn test_default_provider_is_in_memory() {
    let config = QueueServiceConfig::default();
    assert_eq!(config.provider.provider_type(), ProviderType::InMemory);
}

#[test]
fn test_provider_config_deserializes_tagged_variants() {
    let json = r#"{
        "type": "aws_sqs",
        "region": "eu-west-1",
        "endpoint_url": "http://localhost:4566"
    }"#;
    let config: ProviderConfig = serde_json::from_str(json).unwrap();

    match config {
        ProviderConfig::AwsSqs(aws) => {
            assert_eq!(aws.region, "eu-west-1");
            assert_eq!(aws.endpoint_url.as_deref(), Some("http://localhost:4566"));
            assert!(aws.access_key_id.is_none());
        }
        other => panic!("unexpected provider config: {:?}", other),
    }

    let json = r#"{ "type": "in_memory", "auto_create_queues": true }"#;
    let config: ProviderConfig = serde_json::from_str(json).unwrap();
    match config {
        ProviderConfig::InMemory(memory) => {
            assert!(memory.auto_create_queues);
            assert_eq!(memory.visibility_timeout_seconds, 30);
        }
        other => panic!("unexpected provider config: {:?}", other),
    }
}

#[test]
fn test_provider_type_display() {
    assert_eq!(ProviderType::AwsSqs.to_string(), "aws-sqs");
    assert_eq!(ProviderType::InMemory.to_string(), "in-memory");
}
