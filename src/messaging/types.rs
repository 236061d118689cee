//! Core message model and the broker capability contract

use crate::messaging::config::ConsumerConfig;
use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known header keys carried on every message
pub const HEADER_CONTENT_TYPE: &str = "contentType";
pub const HEADER_MESSAGE_ID: &str = "messageId";
pub const HEADER_CORRELATION_ID: &str = "correlationId";
pub const HEADER_SOURCE: &str = "source";
pub const HEADER_RETRY_COUNT: &str = "retryCount";
pub const HEADER_TOPIC: &str = "topic";

/// Open-ended string-keyed header bag.
///
/// Values are JSON so numeric headers (`retryCount`) survive a round trip
/// through the wire encoding unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHeaders(HashMap<String, Value>);

impl MessageHeaders {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_str(HEADER_CONTENT_TYPE)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get_str(HEADER_CORRELATION_ID)
    }

    pub fn source(&self) -> Option<&str> {
        self.get_str(HEADER_SOURCE)
    }

    pub fn retry_count(&self) -> Option<u64> {
        self.0.get(HEADER_RETRY_COUNT).and_then(Value::as_u64)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `other` over this bag, overwriting colliding keys
    pub fn merge(&mut self, other: &MessageHeaders) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<HashMap<String, Value>> for MessageHeaders {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

/// The wire-level record handed to application code.
///
/// `id` and `timestamp` are always present here even though producers supply
/// only payload and headers; the adapter fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: Value,
    pub headers: MessageHeaders,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// What producers hand to `produce`: everything except the adapter-assigned
/// `id` and `timestamp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDraft {
    pub payload: Value,
    #[serde(default)]
    pub headers: MessageHeaders,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
}

impl MessageDraft {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

/// Outcome of an application message handler
pub type HandlerResult = std::result::Result<(), anyhow::Error>;

/// Handler invoked once per delivered message. Its failure or success
/// determines acknowledgment.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Which broker an adapter fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    RedisStream,
    Kafka,
    Custom,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::RedisStream => write!(f, "redis-stream"),
            AdapterKind::Kafka => write!(f, "kafka"),
            AdapterKind::Custom => write!(f, "custom"),
        }
    }
}

/// Capability descriptor returned by [`MessageAdapter::features`].
///
/// Queried polymorphically instead of probing concrete adapter types.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterFeatures {
    pub kind: AdapterKind,
    pub features: Vec<&'static str>,
}

/// The broker capability contract.
///
/// Every mutating call other than `connect` fails fast with a "not connected"
/// error if invoked before a successful `connect`. `produce` is
/// at-least-once: a returned id only guarantees the broker accepted the
/// write.
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    async fn connect(&self) -> MessagingResult<()>;

    async fn disconnect(&self) -> MessagingResult<()>;

    /// Append a message, returning the broker-assigned id
    async fn produce(&self, topic: &str, draft: MessageDraft) -> MessagingResult<String>;

    /// Install a handler invoked once per delivered message; runs until
    /// disconnect
    async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        config: Option<ConsumerConfig>,
    ) -> MessagingResult<()>;

    async fn create_topic(&self, topic: &str) -> MessagingResult<()>;

    async fn delete_topic(&self, topic: &str) -> MessagingResult<()>;

    async fn health_check(&self) -> bool;

    /// Capability descriptor for this adapter
    fn features(&self) -> AdapterFeatures;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_typed_accessors() {
        let headers = MessageHeaders::new()
            .with(HEADER_CONTENT_TYPE, "application/json")
            .with(HEADER_CORRELATION_ID, "corr-123")
            .with(HEADER_RETRY_COUNT, 2);

        assert_eq!(headers.content_type(), Some("application/json"));
        assert_eq!(headers.correlation_id(), Some("corr-123"));
        assert_eq!(headers.retry_count(), Some(2));
        assert_eq!(headers.source(), None);
    }

    #[test]
    fn test_headers_merge_overwrites() {
        let mut base = MessageHeaders::new().with("a", 1).with("b", 2);
        let other = MessageHeaders::new().with("b", 3).with("c", 4);

        base.merge(&other);
        assert_eq!(base.get("a"), Some(&json!(1)));
        assert_eq!(base.get("b"), Some(&json!(3)));
        assert_eq!(base.get("c"), Some(&json!(4)));
    }

    #[test]
    fn test_headers_serialize_transparent() {
        let headers = MessageHeaders::new().with("contentType", "application/json");
        let encoded = serde_json::to_value(&headers).unwrap();
        assert_eq!(encoded, json!({"contentType": "application/json"}));
    }

    #[test]
    fn test_draft_builder() {
        let draft = MessageDraft::new(json!({"n": 1}))
            .with_key("k1")
            .with_partition(3);

        assert_eq!(draft.key.as_deref(), Some("k1"));
        assert_eq!(draft.partition, Some(3));
        assert!(draft.topic.is_none());
    }

    #[test]
    fn test_adapter_kind_display() {
        assert_eq!(AdapterKind::RedisStream.to_string(), "redis-stream");
        assert_eq!(AdapterKind::Kafka.to_string(), "kafka");
    }
}
