//! Kafka adapter
//!
//! Topic = partitioned log. Payloads travel as JSON-encoded value bytes with
//! one record header per message header plus a synthetic `topic` header.
//! Delivery runs through a dedicated `StreamConsumer` per `consume` call;
//! offsets are committed only after the handler succeeds, keeping
//! at-least-once semantics.

use crate::messaging::config::{ConsumerConfig, KafkaConfig};
use crate::messaging::context::AdapterContext;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::types::{
    AdapterFeatures, AdapterKind, Message, MessageAdapter, MessageDraft, MessageHandler,
    MessageHeaders,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message as KafkaMessage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Admin and metadata operation timeout
const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

struct KafkaInner {
    ctx: AdapterContext,
    config: KafkaConfig,
    producer: Mutex<Option<FutureProducer>>,
    admin: Mutex<Option<Arc<AdminClient<DefaultClientContext>>>>,
    consumer_tasks: Mutex<Vec<JoinHandle<()>>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl KafkaInner {
    fn producer(&self) -> MessagingResult<FutureProducer> {
        self.producer
            .lock()
            .clone()
            .ok_or_else(|| MessagingError::NotConnected(self.ctx.name().to_string()))
    }

    fn admin(&self) -> MessagingResult<Arc<AdminClient<DefaultClientContext>>> {
        self.admin
            .lock()
            .clone()
            .ok_or_else(|| MessagingError::NotConnected(self.ctx.name().to_string()))
    }

    fn base_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("client.id", &self.config.client_id);

        if let Some(timeout) = self.config.connection_timeout_ms {
            client_config.set("socket.connection.setup.timeout.ms", timeout.to_string());
        }
        if let Some(timeout) = self.config.request_timeout_ms {
            client_config.set("request.timeout.ms", timeout.to_string());
        }

        if self.config.ssl && self.config.sasl.is_none() {
            client_config.set("security.protocol", "ssl");
        }
        if let Some(sasl) = &self.config.sasl {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanism", &sasl.mechanism)
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        client_config
    }
}

/// Kafka implementation of the broker capability contract
#[derive(Clone)]
pub struct KafkaAdapter {
    inner: Arc<KafkaInner>,
}

/// Flattened per-topic metadata from the broker
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<i32>,
}

/// Consumer-group listing entry from the broker
#[derive(Debug, Clone)]
pub struct ConsumerGroupInfo {
    pub name: String,
    pub state: String,
    pub protocol_type: String,
}

impl KafkaAdapter {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            inner: Arc::new(KafkaInner {
                ctx: AdapterContext::new("KafkaAdapter"),
                config,
                producer: Mutex::new(None),
                admin: Mutex::new(None),
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

    /// Broker metadata for one topic (or all topics when `None`)
    pub async fn topic_metadata(
        &self,
        topic: Option<&str>,
    ) -> MessagingResult<Vec<TopicMetadata>> {
        self.inner.ctx.ensure_connected()?;
        let producer = self.inner.producer()?;
        let topic = topic.map(String::from);

        // fetch_metadata blocks on a broker round trip
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(topic.as_deref(), Timeout::After(ADMIN_TIMEOUT))
        })
        .await
        .map_err(|e| MessagingError::TopicFailed(e.to_string()))?
        .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|t| TopicMetadata {
                name: t.name().to_string(),
                partitions: t.partitions().iter().map(|p| p.id()).collect(),
            })
            .collect())
    }

    /// List consumer groups known to the broker
    pub async fn consumer_groups(&self) -> MessagingResult<Vec<ConsumerGroupInfo>> {
        self.inner.ctx.ensure_connected()?;
        let producer = self.inner.producer()?;

        let groups = tokio::task::spawn_blocking(move || {
            let group_list = producer
                .client()
                .fetch_group_list(None, Timeout::After(ADMIN_TIMEOUT))?;
            Ok::<_, rdkafka::error::KafkaError>(
                group_list
                    .groups()
                    .iter()
                    .map(|g| ConsumerGroupInfo {
                        name: g.name().to_string(),
                        state: g.state().to_string(),
                        protocol_type: g.protocol_type().to_string(),
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| MessagingError::TopicFailed(e.to_string()))?
        .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;

        Ok(groups)
    }
}

#[async_trait]
impl MessageAdapter for KafkaAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        if self.inner.config.client_id.is_empty() || self.inner.config.brokers.is_empty() {
            return Err(MessagingError::Configuration(
                "Kafka configuration is required".to_string(),
            ));
        }

        let mut producer_config = self.inner.base_client_config();
        producer_config.set("message.timeout.ms", "30000");
        if let Some(retries) = self.inner.config.retries {
            producer_config.set("retries", retries.to_string());
        }
        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| MessagingError::ConnectionFailed(format!("Kafka producer creation failed: {}", e)))?;

        let admin: AdminClient<DefaultClientContext> = self
            .inner
            .base_client_config()
            .create()
            .map_err(|e| MessagingError::ConnectionFailed(format!("Kafka admin creation failed: {}", e)))?;

        *self.inner.producer.lock() = Some(producer);
        *self.inner.admin.lock() = Some(Arc::new(admin));
        *self.inner.stop.lock() = Some(watch::channel(false).0);
        self.inner.ctx.set_connected(true);
        info!(adapter = self.inner.ctx.name(), "connected to Kafka");
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.inner.ctx.set_connected(false);

        if let Some(stop) = self.inner.stop.lock().take() {
            let _ = stop.send(true);
        }
        for task in self.inner.consumer_tasks.lock().drain(..) {
            task.abort();
        }

        if let Some(producer) = self.inner.producer.lock().take() {
            // Push out anything still queued before dropping the client
            if let Err(e) = producer.flush(Timeout::After(ADMIN_TIMEOUT)) {
                warn!(error = %e, "Kafka producer flush failed during disconnect");
            }
        }
        *self.inner.admin.lock() = None;
        info!(adapter = self.inner.ctx.name(), "disconnected from Kafka");
        Ok(())
    }

    async fn produce(&self, topic: &str, draft: MessageDraft) -> MessagingResult<String> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("produce", topic, None);

        let payload = serde_json::to_vec(&draft.payload)?;

        let mut headers = OwnedHeaders::new();
        for (key, value) in draft.headers.iter() {
            let value = header_value(value);
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            });
        }
        headers = headers.insert(Header {
            key: "topic",
            value: Some(topic.as_bytes()),
        });

        let mut record: FutureRecord<'_, String, Vec<u8>> =
            FutureRecord::to(topic).payload(&payload).headers(headers);
        if let Some(key) = &draft.key {
            record = record.key(key);
        }
        if let Some(partition) = draft.partition {
            record = record.partition(partition);
        }

        let producer = self.inner.producer()?;
        let (partition, offset) = producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
            .map_err(|(e, _)| MessagingError::ProduceFailed(e.to_string()))?;

        debug!(topic, partition, offset, "message produced");
        Ok(offset.to_string())
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
        let group_id = config
            .group_id
            .clone()
            .unwrap_or_else(|| self.inner.config.client_id.clone());

        let mut consumer_config = self.inner.base_client_config();
        consumer_config
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                if config.read_from_beginning {
                    "earliest"
                } else {
                    "latest"
                },
            );
        if let Some(session_timeout) = config.session_timeout_ms {
            consumer_config.set("session.timeout.ms", session_timeout.to_string());
        }
        if let Some(heartbeat) = config.heartbeat_interval_ms {
            consumer_config.set("heartbeat.interval.ms", heartbeat.to_string());
        }

        let consumer: StreamConsumer = consumer_config
            .create()
            .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka consumer creation failed: {}", e)))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka subscribe failed: {}", e)))?;

        let topic = topic.to_string();
        let mut stop = self.stop_receiver()?;

        let task = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = stop.changed() => break,
                    delivery = consumer.recv() => delivery,
                };

                let record = match delivery {
                    Ok(record) => record,
                    Err(e) => {
                        error!(topic = %topic, error = %e, "Kafka receive failed");
                        continue;
                    }
                };

                let message = match convert_record(
                    &topic,
                    record.partition(),
                    record.offset(),
                    record.payload(),
                    record.key(),
                    record.headers().map(|h| {
                        h.iter()
                            .map(|header| {
                                (
                                    header.key.to_string(),
                                    header
                                        .value
                                        .map(|v| String::from_utf8_lossy(v).to_string())
                                        .unwrap_or_default(),
                                )
                            })
                            .collect()
                    }),
                    record.timestamp().to_millis(),
                ) {
                    Ok(message) => message,
                    Err(e) => {
                        error!(
                            topic = %topic,
                            partition = record.partition(),
                            offset = record.offset(),
                            error = %e,
                            "failed to decode Kafka record"
                        );
                        continue;
                    }
                };

                match handler(message).await {
                    Ok(()) => {
                        if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                            error!(topic = %topic, error = %e, "Kafka commit failed");
                        }
                    }
                    Err(e) => {
                        // No commit: the record is redelivered on the next
                        // rebalance or restart
                        error!(
                            topic = %topic,
                            partition = record.partition(),
                            offset = record.offset(),
                            error = %e,
                            "handler failed; offset not committed"
                        );
                    }
                }
            }

            debug!(topic = %topic, "Kafka consumer loop stopped");
        });

        self.inner.consumer_tasks.lock().push(task);
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> MessagingResult<()> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("create_topic", topic, None);

        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(ADMIN_TIMEOUT)));
        let admin = self.inner.admin()?;
        let results = admin
            .create_topics(
                &[NewTopic::new(topic, 1, TopicReplication::Fixed(1))],
                &options,
            )
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;

        for result in results {
            result.map_err(|(name, code)| {
                MessagingError::TopicFailed(format!("create {} failed: {}", name, code))
            })?;
        }
        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> MessagingResult<()> {
        self.inner.ctx.ensure_connected()?;
        self.inner.ctx.log_operation("delete_topic", topic, None);

        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(ADMIN_TIMEOUT)));
        let admin = self.inner.admin()?;
        let results = admin
            .delete_topics(&[topic], &options)
            .await
            .map_err(|e| MessagingError::TopicFailed(e.to_string()))?;

        for result in results {
            result.map_err(|(name, code)| {
                MessagingError::TopicFailed(format!("delete {} failed: {}", name, code))
            })?;
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        if !self.inner.ctx.is_connected() {
            return false;
        }

        let Ok(producer) = self.inner.producer() else {
            return false;
        };
        let fetched = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(ADMIN_TIMEOUT))
        })
        .await;

        match fetched {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Kafka health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Kafka health check task failed");
                false
            }
        }
    }

    fn features(&self) -> AdapterFeatures {
        AdapterFeatures {
            kind: AdapterKind::Kafka,
            features: vec![
                "partitions",
                "consumer-groups",
                "topic-metadata",
                "offset-management",
            ],
        }
    }
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a native record into the common [`Message`] shape
#[allow(clippy::too_many_arguments)]
fn convert_record(
    topic: &str,
    partition: i32,
    offset: i64,
    payload: Option<&[u8]>,
    key: Option<&[u8]>,
    headers: Option<Vec<(String, String)>>,
    timestamp_ms: Option<i64>,
) -> MessagingResult<Message> {
    let payload = match payload {
        Some(bytes) => serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::Deserialization(format!("bad record value: {}", e)))?,
        None => Value::Null,
    };

    let mut message_headers = MessageHeaders::new();
    if let Some(headers) = headers {
        for (key, value) in headers {
            message_headers.insert(key, value);
        }
    }

    let timestamp = timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Message {
        id: format!("{}-{}-{}", topic, partition, offset),
        payload,
        headers: message_headers,
        timestamp,
        key: key.map(|k| String::from_utf8_lossy(k).to_string()),
        topic: Some(topic.to_string()),
        partition: Some(partition),
        offset: Some(offset),
    })
}
