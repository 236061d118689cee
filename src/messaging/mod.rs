//! Broker-agnostic messaging layer
//!
//! A single produce/consume contract that runs identically over Redis
//! Streams and Kafka, behind one facade.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            MessagingService (facade)             │
//! ├─────────────────────────────────────────────────┤
//! │  - produce()      - consume()                    │
//! │  - createTopic()  - deleteTopic()                │
//! │  - healthCheck()  - features()                   │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │        MessageAdapter (capability contract)      │
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────┐
//! │  Redis Streams   │    │      Kafka       │
//! ├──────────────────┤    ├──────────────────┤
//! │ - XADD/XREAD     │    │ - Partitions     │
//! │ - Groups + XACK  │    │ - Offset commit  │
//! │ - No-group tail  │    │ - Admin API      │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! Delivery is at-least-once with caller-driven acknowledgment: a handler's
//! own success or failure decides whether an entry is acked (Redis) or its
//! offset committed (Kafka).
//!
//! # Example
//!
//! ```no_run
//! use message_relay::messaging::{
//!     AdapterSelection, MessageDraft, MessagingConfig, MessagingService, RedisStreamConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MessagingService::new();
//!     service
//!         .configure(MessagingConfig::new(AdapterSelection::Redis(
//!             RedisStreamConfig {
//!                 host: Some("localhost".into()),
//!                 port: Some(6379),
//!                 ..Default::default()
//!             },
//!         )))
//!         .await?;
//!
//!     let id = service
//!         .produce("notes.created", MessageDraft::new(json!({"note": "n-1"})))
//!         .await?;
//!     println!("produced {id}");
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod error;
mod kafka;
mod metrics;
mod redis_stream;
mod registry;
mod serializer;
mod service;
mod types;

pub use config::{
    ConsumerConfig, KafkaConfig, KafkaSasl, ProducerConfig, RedisStreamConfig, ServiceOptions,
};
pub use context::{complete_message, generate_message_id, AdapterContext};
pub use error::{MessagingError, MessagingResult};
pub use kafka::{ConsumerGroupInfo, KafkaAdapter, TopicMetadata};
pub use metrics::{init_messaging_metrics, MESSAGING_METRICS};
pub use redis_stream::RedisStreamAdapter;
pub use registry::HandlerRegistry;
pub use serializer::{MessageSerializer, DEFAULT_MAX_MESSAGE_SIZE};
pub use service::{AdapterSelection, MessagingConfig, MessagingService};
pub use types::{
    handler, AdapterFeatures, AdapterKind, HandlerResult, Message, MessageAdapter, MessageDraft,
    MessageHandler, MessageHeaders, HEADER_CONTENT_TYPE, HEADER_CORRELATION_ID, HEADER_MESSAGE_ID,
    HEADER_RETRY_COUNT, HEADER_SOURCE, HEADER_TOPIC,
};
