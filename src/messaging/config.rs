//! Messaging configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis Streams connection configuration.
///
/// Connecting with an entirely empty config fails explicitly rather than
/// attempting a default connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisStreamConfig {
    /// Redis host
    pub host: Option<String>,

    /// Redis port
    pub port: Option<u16>,

    /// Password for AUTH
    pub password: Option<String>,

    /// Database index
    pub db: Option<i64>,

    /// Full connection URL; takes precedence over host/port
    pub url: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Maximum retries per request
    pub max_retries_per_request: Option<u32>,
}

impl RedisStreamConfig {
    /// True when no field is set at all
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.password.is_none()
            && self.db.is_none()
            && self.url.is_none()
            && self.connect_timeout_ms.is_none()
            && self.max_retries_per_request.is_none()
    }

    /// Resolve the connection URL from the configured fields
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let host = self.host.as_deref().unwrap_or("localhost");
        let port = self.port.unwrap_or(6379);
        let auth = self
            .password
            .as_deref()
            .map(|p| format!(":{}@", p))
            .unwrap_or_default();
        let db = self.db.map(|db| format!("/{}", db)).unwrap_or_default();

        format!("redis://{}{}:{}{}", auth, host, port, db)
    }
}

/// SASL credentials for Kafka
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSasl {
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

/// Kafka connection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Client ID
    pub client_id: String,

    /// Bootstrap broker addresses
    pub brokers: Vec<String>,

    /// Enable SSL/TLS
    pub ssl: bool,

    /// SASL authentication
    pub sasl: Option<KafkaSasl>,

    /// Connection timeout in milliseconds
    pub connection_timeout_ms: Option<u64>,

    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Producer retry count
    pub retries: Option<u32>,
}

/// Producer tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Adapter tag this producer targets
    pub adapter: crate::messaging::AdapterKind,

    pub client_id: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub batch_size: Option<usize>,
}

/// Consumer tuning knobs.
///
/// `group_id: None` means "simple tailing consumer". That mode exists for
/// both adapters but has different durability: Kafka still creates an
/// implicit group, Redis has no group at all and cannot redeliver on crash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub group_id: Option<String>,
    pub client_id: Option<String>,
    pub session_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub max_poll_records: Option<usize>,
    pub read_from_beginning: bool,
}

impl ConsumerConfig {
    pub fn group(group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }
}

/// Facade behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Run the background health-check/reconnect loop
    pub enable_health_check: bool,

    /// Interval between facade health checks
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Bounded reconnection attempts after a failed health check
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts
    #[serde(with = "duration_millis")]
    pub reconnect_delay: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            enable_health_check: true,
            health_check_interval: Duration::from_secs(30),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
