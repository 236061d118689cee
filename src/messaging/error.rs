//! Error types for messaging operations

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Adapter used before a successful connect
    #[error("{0} is not connected")]
    NotConnected(String),

    /// Facade used before configure()
    #[error("Messaging service not configured. Call configure() first.")]
    NotConfigured,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Produce failed
    #[error("Produce failed: {0}")]
    ProduceFailed(String),

    /// Consume failed
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// Topic management failed
    #[error("Topic operation failed: {0}")]
    TopicFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Message handler rejected a delivery
    #[error("Handler failed for message {message_id}: {source}")]
    Handler {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for MessagingError {
    fn from(err: redis::RedisError) -> Self {
        MessagingError::ConnectionFailed(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for MessagingError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        MessagingError::ConnectionFailed(err.to_string())
    }
}
