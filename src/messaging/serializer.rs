//! Transport encoding for [`Message`]
//!
//! The wire format is a single JSON object `{id, payload, headers, timestamp,
//! key?, topic?, partition?, offset?}` with the timestamp rendered as an
//! RFC 3339 string at millisecond precision.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::types::{Message, MessageHeaders};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Default upper bound for a serialized message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encodes and decodes messages to/from the transport-safe JSON form,
/// validating required fields on the way in.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSerializer;

impl MessageSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, message: &Message) -> MessagingResult<String> {
        let headers = serde_json::to_value(&message.headers)
            .map_err(|e| MessagingError::Serialization(format!("Failed to serialize message: {}", e)))?;

        let mut map = serde_json::Map::new();
        map.insert("id".into(), json!(message.id));
        map.insert("payload".into(), message.payload.clone());
        map.insert("headers".into(), headers);
        map.insert(
            "timestamp".into(),
            json!(message
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        if let Some(key) = &message.key {
            map.insert("key".into(), json!(key));
        }
        if let Some(topic) = &message.topic {
            map.insert("topic".into(), json!(topic));
        }
        if let Some(partition) = message.partition {
            map.insert("partition".into(), json!(partition));
        }
        if let Some(offset) = message.offset {
            map.insert("offset".into(), json!(offset));
        }

        serde_json::to_string(&Value::Object(map))
            .map_err(|e| MessagingError::Serialization(format!("Failed to serialize message: {}", e)))
    }

    pub fn deserialize(&self, data: &str) -> MessagingResult<Message> {
        let parsed: Value = serde_json::from_str(data)
            .map_err(|e| MessagingError::Deserialization(format!("Failed to parse message: {}", e)))?;

        let object = parsed
            .as_object()
            .ok_or_else(|| MessagingError::InvalidMessage("not a JSON object".into()))?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MessagingError::InvalidMessage("missing id".into()))?
            .to_string();

        let payload = object
            .get("payload")
            .cloned()
            .ok_or_else(|| MessagingError::InvalidMessage("missing payload".into()))?;

        let headers = match object.get("headers") {
            Some(value) if value.is_object() => {
                serde_json::from_value::<MessageHeaders>(value.clone())
                    .map_err(|e| MessagingError::InvalidMessage(format!("bad headers: {}", e)))?
            }
            _ => return Err(MessagingError::InvalidMessage("missing headers".into())),
        };

        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| MessagingError::InvalidMessage("missing timestamp".into()))
            .and_then(parse_timestamp)?;

        Ok(Message {
            id,
            payload,
            headers,
            timestamp,
            key: object.get("key").and_then(Value::as_str).map(String::from),
            topic: object.get("topic").and_then(Value::as_str).map(String::from),
            partition: object
                .get("partition")
                .and_then(Value::as_i64)
                .map(|p| p as i32),
            offset: object.get("offset").and_then(Value::as_i64),
        })
    }

    /// Serialized size in bytes, or None when the message cannot be encoded
    pub fn message_size(&self, message: &Message) -> Option<usize> {
        self.serialize(message).ok().map(|s| s.len())
    }

    /// Check the encoded message fits under `max_size_bytes`
    pub fn validate_message_size(&self, message: &Message, max_size_bytes: usize) -> bool {
        self.message_size(message)
            .map(|size| size <= max_size_bytes)
            .unwrap_or(false)
    }
}

fn parse_timestamp(raw: &str) -> MessagingResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MessagingError::InvalidMessage(format!("Invalid timestamp format: {}", raw)))
}
