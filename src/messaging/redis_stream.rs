//! Redis Streams adapter
//!
//! Topic = stream name. Entries carry a flat field list (`payload` and
//! `headers` as JSON strings, plus a denormalized `topic` field). Consumer
//! groups give competing-consumers delivery with explicit `XACK` after
//! handler success; the group-less consumer is a simple tail with no
//! acknowledgment and no replay on crash.

use crate::messaging::config::{ConsumerConfig, RedisStreamConfig};
use crate::messaging::context::AdapterContext;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::types::{
    AdapterFeatures, AdapterKind, Message, MessageAdapter, MessageDraft, MessageHandler,
    MessageHeaders,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamId, StreamInfoGroupsReply, StreamInfoStreamReply, StreamPendingReply,
    StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default blocking-read window for poll loops, bounding how long a loop can
/// go without observing the stop signal
const DEFAULT_BLOCK_MS: u64 = 1000;

/// Pause after a failed poll so a dead connection does not spin the loop
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct RedisInner {
    ctx: AdapterContext,
    config: RedisStreamConfig,
    connection: RwLock<Option<ConnectionManager>>,
    consumer_tasks: Mutex<Vec<JoinHandle<()>>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl RedisInner {
    fn connection(&self) -> MessagingResult<ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| MessagingError::NotConnected(self.ctx.name().to_string()))
    }
}

/// Redis Streams implementation of the broker capability contract
#[derive(Clone)]
pub struct RedisStreamAdapter {
    inner: Arc<RedisInner>,
}

impl RedisStreamAdapter {
    pub fn new(config: RedisStreamConfig) -> Self {
        Self {
            inner: Arc::new(RedisInner {
                ctx: AdapterContext::new("RedisStreamAdapter"),
                config,
                connection: RwLock::new(None),
                consumer_tasks: Mutex::new(Vec::new()),
                stop: Mutex::new(None),
            }),
        }
    }

    fn stop_receiver(&self) -> MessagingResult<watch::Receiver<bool>> {
        self.inner
            .stop
            .lock()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| MessagingError::NotConnected(self.inner.ctx.name().to_string()))
    }

    /// Stream introspection (`XINFO STREAM`)
    pub async fn stream_info(&self, topic: &str) -> MessagingResult<StreamInfoStreamReply> {
        self.inner.ctx.ensure_connected()?;
        let mut conn = self.inner.connection()?;
        let reply = conn
            .xinfo_stream(topic)
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        Ok(reply)
    }

    /// Consumer-group introspection (`XINFO GROUPS`)
    pub async fn consumer_groups(&self, topic: &str) -> MessagingResult<StreamInfoGroupsReply> {
        self.inner.ctx.ensure_connected()?;
        let mut conn = self.inner.connection()?;
        let reply = conn
            .xinfo_groups(topic)
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        Ok(reply)
    }

    /// Pending (delivered but unacknowledged) entries for a group
    pub async fn pending_messages(
        &self,
        topic: &str,
        group_id: &str,
    ) -> MessagingResult<StreamPendingReply> {
        self.inner.ctx.ensure_connected()?;
        let mut conn = self.inner.connection()?;
        let reply = conn
            .xpending(topic, group_id)
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        Ok(reply)
    }

    async fn consume_without_group(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> MessagingResult<()> {
        let inner = self.inner.clone();
        let topic = topic.to_string();
        let stop = self.stop_receiver()?;

        let task = tokio::spawn(async move {
            loop {
                if *stop.borrow() || !inner.ctx.is_connected() {
                    break;
                }

                let mut conn = match inner.connection() {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                // Bounded block so the stop signal is observed between reads
                let opts = StreamReadOptions::default().block(DEFAULT_BLOCK_MS as usize);
                let reply: StreamReadReply =
                    match conn.xread_options(&[&topic], &["$"], &opts).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(topic = %topic, error = %e, "error in consumer poll");
                            tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                for key in reply.keys {
                    for entry in key.ids {
                        let message = match parse_entry(&entry) {
                            Ok(message) => message,
                            Err(e) => {
                                error!(
                                    topic = %topic,
                                    entry_id = %entry.id,
                                    error = %e,
                                    "failed to decode stream entry"
                                );
                                continue;
                            }
                        };

                        if let Err(e) = handler(message).await {
                            error!(
                                topic = %topic,
                                entry_id = %entry.id,
                                error = %e,
                                "handler failed; no redelivery without a consumer group"
                            );
                        }
                    }
                }
            }

            debug!(topic = %topic, "simple consumer loop stopped");
        });

        self.inner.consumer_tasks.lock().push(task);
        Ok(())
    }

    async fn consume_with_group(
        &self,
        topic: &str,
        handler: MessageHandler,
        group_id: String,
        client_id: String,
        config: ConsumerConfig,
    ) -> MessagingResult<()> {
        let mut conn = self.inner.connection()?;

        // Idempotent group creation: a pre-existing group is fine, anything
        // else propagates
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(topic, &group_id, "0").await;
        match created {
            Ok(_) => debug!(topic, group = %group_id, "consumer group created"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(topic, group = %group_id, "consumer group already exists");
            }
            Err(e) => return Err(MessagingError::ConsumeFailed(e.to_string())),
        }

        let inner = self.inner.clone();
        let topic = topic.to_string();
        let stop = self.stop_receiver()?;
        let count = config.max_poll_records.unwrap_or(1);
        let block_ms = config.session_timeout_ms.unwrap_or(DEFAULT_BLOCK_MS) as usize;

        let task = tokio::spawn(async move {
            loop {
                if *stop.borrow() || !inner.ctx.is_connected() {
                    break;
                }

                let mut conn = match inner.connection() {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let opts = StreamReadOptions::default()
                    .group(&group_id, &client_id)
                    .count(count)
                    .block(block_ms);
                let reply: StreamReadReply =
                    match conn.xread_options(&[&topic], &[">"], &opts).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(
                                topic = %topic,
                                group = %group_id,
                                error = %e,
                                "error in consumer group poll"
                            );
                            tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                for key in reply.keys {
                    let stream_name = key.key.clone();
                    'batch: for entry in key.ids {
                        let entry_id = entry.id.clone();
                        let message = match parse_entry(&entry) {
                            Ok(message) => message,
                            Err(e) => {
                                error!(
                                    topic = %topic,
                                    entry_id = %entry_id,
                                    error = %e,
                                    "failed to decode stream entry"
                                );
                                break 'batch;
                            }
                        };

                        let mut ack_conn = conn.clone();
                        let ack_stream = stream_name.clone();
                        let ack_group = group_id.clone();
                        let ack_id = entry_id.clone();
                        let delivery = deliver_then_ack(message, &handler, || async move {
                            let _: i64 = ack_conn
                                .xack(&ack_stream, &ack_group, &[&ack_id])
                                .await
                                .map_err(MessagingError::from)?;
                            Ok(())
                        })
                        .await;

                        if let Err(e) = delivery {
                            // Unacknowledged entries stay pending for
                            // redelivery; skip the rest of the batch
                            error!(
                                topic = %topic,
                                group = %group_id,
                                error = %e,
                                "failed to process message"
                            );
                            break 'batch;
                        }
                    }
                }
            }

            debug!(topic = %topic, "consumer group loop stopped");
        });

        self.inner.consumer_tasks.lock().push(task);
        Ok(())
    }
}

#[async_trait]
impl MessageAdapter for RedisStreamAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        if self.inner.config.is_empty() {
            return Err(MessagingError::Configuration(
                "Redis configuration is required".to_string(),
            ));
        }

        let url = self.inner.config.connection_url();
        let client = Client::open(url.as_str())
            .map_err(|e| MessagingError::ConnectionFailed(format!("invalid Redis URL: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;

        // Verify the connection before reporting healthy
        let mut probe = connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut probe)
            .await
            .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;
        if pong != "PONG" {
            return Err(MessagingError::ConnectionFailed(format!(
                "unexpected PING reply: {}",
                pong
            )));
        }

        *self.inner.connection.write() = Some(connection);
        *self.inner.stop.lock() = Some(watch::channel(false).0);
        self.inner.ctx.set_connected(true);
        info!(adapter = self.inner.ctx.name(), "connected to Redis");
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.inner.ctx.set_connected(false);

        // Signal loops first, then cancel whatever is mid-poll
        if let Some(stop) = self.inner.stop.lock().take() {
            let _ = stop.send(true);
        }
        for task in self.inner.consumer_tasks.lock().drain(..) {
            task.abort();
        }

        *self.inner.connection.write() = None;
        info!(adapter = self.inner.ctx.name(), "disconnected from Redis");
        Ok(())
    }

    async fn produce(&self, topic: &str, draft: MessageDraft) -> MessagingResult<String> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("produce", topic, None);

        let payload = serde_json::to_string(&draft.payload)?;
        let mut headers = draft.headers.clone();
        headers.insert("topic", topic);
        let headers = serde_json::to_string(&headers)?;

        let mut fields: Vec<(&str, String)> = vec![("payload", payload), ("headers", headers)];
        if let Some(draft_topic) = &draft.topic {
            fields.push(("topic", draft_topic.clone()));
        }

        let entry_id = draft.key.as_deref().unwrap_or("*");
        let mut conn = self.inner.connection()?;
        let message_id: String = conn
            .xadd(topic, entry_id, &fields)
            .await
            .map_err(|e| MessagingError::ProduceFailed(e.to_string()))?;

        self.inner
            .ctx
            .log_operation("produced", topic, Some(&message_id));
        Ok(message_id)
    }

    async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        config: Option<ConsumerConfig>,
    ) -> MessagingResult<()> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("consume", topic, None);

        let config = config.unwrap_or_default();
        match (config.group_id.clone(), config.client_id.clone()) {
            (Some(group_id), Some(client_id)) => {
                self.consume_with_group(topic, handler, group_id, client_id, config)
                    .await
            }
            _ => self.consume_without_group(topic, handler).await,
        }
    }

    async fn create_topic(&self, topic: &str) -> MessagingResult<()> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("create_topic", topic, None);

        // Streams exist only once they hold an entry: write a sentinel, then
        // delete it
        let mut conn = self.inner.connection()?;
        let sentinel: String = conn
            .xadd(topic, "*", &[("init", "true")])
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        let _: i64 = conn
            .xdel(topic, &[&sentinel])
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> MessagingResult<()> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("delete_topic", topic, None);

        let mut conn = self.inner.connection()?;
        let _: i64 = conn
            .del(topic)
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        if !self.inner.ctx.is_connected() {
            return false;
        }

        let Ok(mut conn) = self.inner.connection() else {
            return false;
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(pong) => pong == "PONG",
            Err(e) => {
                warn!(error = %e, "Redis health check failed");
                false
            }
        }
    }

    fn features(&self) -> AdapterFeatures {
        AdapterFeatures {
            kind: AdapterKind::RedisStream,
            features: vec![
                "streams",
                "consumer-groups",
                "pending-messages",
                "stream-info",
            ],
        }
    }
}

/// Rebuild a [`Message`] from the flat field list of a stream entry
fn parse_entry(entry: &StreamId) -> MessagingResult<Message> {
    let payload_raw: Option<String> = entry.get("payload");
    let headers_raw: Option<String> = entry.get("headers");

    let (payload_raw, headers_raw) = match (payload_raw, headers_raw) {
        (Some(payload), Some(headers)) => (payload, headers),
        _ => {
            return Err(MessagingError::InvalidMessage(
                "missing payload or headers".to_string(),
            ))
        }
    };

    let payload = serde_json::from_str(&payload_raw)
        .map_err(|e| MessagingError::Deserialization(format!("bad payload field: {}", e)))?;
    let headers: MessageHeaders = serde_json::from_str(&headers_raw)
        .map_err(|e| MessagingError::Deserialization(format!("bad headers field: {}", e)))?;

    let timestamp = entry
        .get::<String>("timestamp")
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Message {
        id: entry.id.clone(),
        payload,
        headers,
        timestamp,
        key: None,
        topic: entry.get::<String>("topic"),
        partition: None,
        offset: None,
    })
}

/// Run the handler, acknowledging only after it succeeds. A handler failure
/// leaves the entry pending and surfaces as a `Handler` error.
async fn deliver_then_ack<A, Fut>(
    message: Message,
    handler: &MessageHandler,
    ack: A,
) -> MessagingResult<()>
where
    A: FnOnce() -> Fut,
    Fut: std::future::Future<Output = MessagingResult<()>>,
{
    let message_id = message.id.clone();
    match handler(message).await {
        Ok(()) => {
            ack().await?;
            Ok(())
        }
        Err(source) => Err(MessagingError::Handler { message_id, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::types::handler;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(id: &str, fields: &[(&str, &str)]) -> StreamId {
        let mut map = HashMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), redis::Value::Data(v.as_bytes().to_vec()));
        }
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    #[test]
    fn test_parse_entry_round_trip() {
        let entry = entry(
            "1700000000000-0",
            &[
                ("payload", r#"{"n":1}"#),
                ("headers", r#"{"contentType":"application/json","topic":"orders"}"#),
                ("topic", "orders"),
            ],
        );

        let message = parse_entry(&entry).unwrap();
        assert_eq!(message.id, "1700000000000-0");
        assert_eq!(message.payload, json!({"n": 1}));
        assert_eq!(message.headers.get_str("topic"), Some("orders"));
        assert_eq!(message.topic.as_deref(), Some("orders"));
    }

    #[test]
    fn test_parse_entry_missing_fields() {
        let entry = entry("1-0", &[("payload", "{}")]);
        let err = parse_entry(&entry).unwrap_err();
        assert!(err.to_string().contains("missing payload or headers"));
    }

    #[test]
    fn test_parse_entry_bad_payload_json() {
        let entry = entry("1-0", &[("payload", "{nope"), ("headers", "{}")]);
        assert!(matches!(
            parse_entry(&entry).unwrap_err(),
            MessagingError::Deserialization(_)
        ));
    }

    #[tokio::test]
    async fn test_deliver_acks_exactly_once_after_handler() {
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let ack_calls = Arc::new(AtomicUsize::new(0));

        let seen_payload = Arc::new(parking_lot::Mutex::new(None));
        let handler = {
            let handler_calls = handler_calls.clone();
            let ack_calls = ack_calls.clone();
            let seen_payload = seen_payload.clone();
            handler(move |message: Message| {
                let handler_calls = handler_calls.clone();
                let ack_calls = ack_calls.clone();
                let seen_payload = seen_payload.clone();
                async move {
                    // Ack must not have happened yet
                    assert_eq!(ack_calls.load(Ordering::SeqCst), 0);
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    *seen_payload.lock() = Some(message.payload);
                    Ok(())
                }
            })
        };

        let message = parse_entry(&entry(
            "7-0",
            &[("payload", r#"{"n":1}"#), ("headers", "{}")],
        ))
        .unwrap();

        let ack_counter = ack_calls.clone();
        deliver_then_ack(message, &handler, || async move {
            ack_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(handler_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ack_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_payload.lock(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_deliver_skips_ack_on_handler_failure() {
        let ack_calls = Arc::new(AtomicUsize::new(0));
        let handler = handler(|_| async { Err(anyhow::anyhow!("handler rejected")) });

        let message = parse_entry(&entry(
            "8-0",
            &[("payload", "1"), ("headers", "{}")],
        ))
        .unwrap();

        let ack_counter = ack_calls.clone();
        let err = deliver_then_ack(message, &handler, || async move {
            ack_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, MessagingError::Handler { .. }));
        assert_eq!(ack_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_requires_configuration() {
        let adapter = RedisStreamAdapter::new(RedisStreamConfig::default());
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
        assert!(err.to_string().contains("Redis configuration is required"));
    }

    #[tokio::test]
    async fn test_operations_fail_before_connect() {
        let adapter = RedisStreamAdapter::new(RedisStreamConfig::default());

        let err = adapter
            .produce("orders", MessageDraft::new(json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected(_)));

        let err = adapter.create_topic("orders").await.unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected(_)));

        let err = adapter.delete_topic("orders").await.unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected(_)));

        assert!(!adapter.health_check().await);
    }

    #[test]
    fn test_features_descriptor() {
        let adapter = RedisStreamAdapter::new(RedisStreamConfig::default());
        let features = adapter.features();
        assert_eq!(features.kind, AdapterKind::RedisStream);
        assert!(features.features.contains(&"consumer-groups"));
    }
}
