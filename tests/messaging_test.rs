use chrono::{TimeZone, Utc};
use message_relay::messaging::{
    handler, AdapterKind, AdapterSelection, ConsumerConfig, KafkaAdapter, KafkaConfig, Message,
    MessageAdapter, MessageDraft, MessageHeaders, MessageSerializer, MessagingConfig,
    MessagingError, MessagingService, RedisStreamAdapter, RedisStreamConfig, ServiceOptions,
};
use serde_json::json;

/// Test facade operations before configure() fail explicitly
#[tokio::test]
async fn test_facade_requires_configuration() {
    let service = MessagingService::new();

    let err = service
        .produce("orders", MessageDraft::new(json!({"n": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::NotConfigured));
    assert_eq!(
        err.to_string(),
        "Messaging service not configured. Call configure() first."
    );

    let noop = handler(|_: Message| async { Ok(()) });
    assert!(service.consume("orders", noop, None).await.is_err());
    assert!(service.create_topic("orders").await.is_err());
    assert!(service.delete_topic("orders").await.is_err());
    assert!(!service.health_check().await);
}

/// Test connecting with an empty Redis config fails explicitly
#[tokio::test]
async fn test_redis_empty_config_rejected() {
    let service = MessagingService::new();
    let config = MessagingConfig::new(AdapterSelection::Redis(RedisStreamConfig::default()))
        .with_options(ServiceOptions {
            enable_health_check: false,
            ..Default::default()
        });

    let err = service.configure(config).await.unwrap_err();
    assert!(err.to_string().contains("Redis configuration is required"));
}

/// Test connecting with an empty Kafka config fails explicitly
#[tokio::test]
async fn test_kafka_empty_config_rejected() {
    let service = MessagingService::new();
    let config = MessagingConfig::new(AdapterSelection::Kafka(KafkaConfig::default()))
        .with_options(ServiceOptions {
            enable_health_check: false,
            ..Default::default()
        });

    let err = service.configure(config).await.unwrap_err();
    assert!(err.to_string().contains("Kafka configuration is required"));
}

/// Test adapter operations before connect fail fast
#[tokio::test]
async fn test_adapters_fail_fast_when_not_connected() {
    let redis = RedisStreamAdapter::new(RedisStreamConfig::default());
    let err = redis
        .produce("orders", MessageDraft::new(json!(1)))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "RedisStreamAdapter is not connected");

    let kafka = KafkaAdapter::new(KafkaConfig {
        client_id: "test".to_string(),
        brokers: vec!["localhost:9092".to_string()],
        ..Default::default()
    });
    let err = kafka
        .produce("orders", MessageDraft::new(json!(1)))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "KafkaAdapter is not connected");
}

/// Test capability descriptors replace concrete-type probing
#[test]
fn test_adapter_feature_descriptors() {
    let redis = RedisStreamAdapter::new(RedisStreamConfig::default());
    let features = redis.features();
    assert_eq!(features.kind, AdapterKind::RedisStream);
    assert_eq!(
        features.features,
        vec![
            "streams",
            "consumer-groups",
            "pending-messages",
            "stream-info"
        ]
    );

    let kafka = KafkaAdapter::new(KafkaConfig::default());
    let features = kafka.features();
    assert_eq!(features.kind, AdapterKind::Kafka);
    assert_eq!(
        features.features,
        vec![
            "partitions",
            "consumer-groups",
            "topic-metadata",
            "offset-management"
        ]
    );
}

/// Round-trip: deserialize(serialize(m)) is deep-equal to m at millisecond
/// timestamp precision
#[test]
fn test_serializer_round_trip() {
    let serializer = MessageSerializer::new();
    let message = Message {
        id: "msg-42".to_string(),
        payload: json!({"note": {"title": "hello", "tags": ["a", "b"]}}),
        headers: MessageHeaders::new()
            .with("contentType", "application/json")
            .with("correlationId", "corr-7")
            .with("retryCount", 1),
        timestamp: Utc.with_ymd_and_hms(2024, 11, 5, 8, 15, 30).unwrap()
            + chrono::Duration::milliseconds(250),
        key: Some("note-1".to_string()),
        topic: Some("notes.created".to_string()),
        partition: Some(0),
        offset: Some(1337),
    };

    let encoded = serializer.serialize(&message).unwrap();
    let decoded = serializer.deserialize(&encoded).unwrap();
    assert_eq!(decoded, message);
}

/// Deserialization rejects structurally invalid wire messages
#[test]
fn test_serializer_validation() {
    let serializer = MessageSerializer::new();

    let cases = [
        // missing id
        r#"{"payload":1,"headers":{},"timestamp":"2024-01-01T00:00:00Z"}"#,
        // missing payload key
        r#"{"id":"m","headers":{},"timestamp":"2024-01-01T00:00:00Z"}"#,
        // headers not an object
        r#"{"id":"m","payload":1,"headers":"x","timestamp":"2024-01-01T00:00:00Z"}"#,
        // unparseable timestamp
        r#"{"id":"m","payload":1,"headers":{},"timestamp":"yesterday"}"#,
        // not JSON at all
        "not json",
    ];

    for case in cases {
        assert!(serializer.deserialize(case).is_err(), "accepted: {}", case);
    }
}

/// Test consumer config distinguishes group and simple tailing modes
#[test]
fn test_consumer_config_modes() {
    let tailing = ConsumerConfig::default();
    assert!(tailing.group_id.is_none());

    let grouped = ConsumerConfig::group("workers", "worker-1");
    assert_eq!(grouped.group_id.as_deref(), Some("workers"));
    assert_eq!(grouped.client_id.as_deref(), Some("worker-1"));
}

/// Test service options carry the documented defaults
#[test]
fn test_service_option_defaults() {
    let options = ServiceOptions::default();
    assert!(options.enable_health_check);
    assert_eq!(options.health_check_interval.as_secs(), 30);
    assert_eq!(options.reconnect_attempts, 5);
    assert_eq!(options.reconnect_delay.as_secs(), 5);
}

/// Test drafts never carry id or timestamp; adapters assign them
#[test]
fn test_draft_shape() {
    let draft = MessageDraft::new(json!({"n": 1}))
        .with_headers(MessageHeaders::new().with("source", "api"))
        .with_key("k-1");

    let encoded = serde_json::to_value(&draft).unwrap();
    assert!(encoded.get("id").is_none());
    assert!(encoded.get("timestamp").is_none());
    assert_eq!(encoded["key"], json!("k-1"));
}
