//! Bounded dead-letter storage
//!
//! Messages that exhausted their retries land here for later inspection or
//! replay. The store has a hard size limit; insertion is rejected once full
//! rather than evicting older entries.

use crate::messaging::Message;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Dead-letter behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterSettings {
    pub enabled: bool,
    pub max_retries: u32,
    #[serde(skip)]
    pub retry_delay: Duration,
    pub dlq_topic: String,
    pub max_size: usize,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            dlq_topic: "dead-letter-queue".to_string(),
            max_size: 1000,
        }
    }
}

/// One stored failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message: Message,
    pub error: String,
    pub topic: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Why an insertion was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterRejection {
    Disabled,
    Full,
}

impl fmt::Display for DeadLetterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterRejection::Disabled => write!(f, "DLQ_DISABLED"),
            DeadLetterRejection::Full => write!(f, "DLQ_FULL"),
        }
    }
}

/// Result of routing a failed message to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterOutcome {
    Stored {
        error_message: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    Rejected(DeadLetterRejection),
}

impl DeadLetterOutcome {
    pub fn dead_lettered(&self) -> bool {
        matches!(self, DeadLetterOutcome::Stored { .. })
    }
}

/// The bounded store itself
#[derive(Debug)]
pub struct DeadLetterQueue {
    settings: Mutex<DeadLetterSettings>,
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DeadLetterSettings::default())
    }
}

impl DeadLetterQueue {
    pub fn new(settings: DeadLetterSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> DeadLetterSettings {
        self.settings.lock().clone()
    }

    /// Shrink or grow the capacity; existing entries are kept
    pub fn set_max_size(&self, max_size: usize) {
        self.settings.lock().max_size = max_size;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.lock().enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Store a failed message, refusing when disabled or full
    pub fn push(
        &self,
        message: Message,
        error: &str,
        topic: &str,
        retry_count: u32,
    ) -> DeadLetterOutcome {
        let (enabled, max_size) = {
            let settings = self.settings.lock();
            (settings.enabled, settings.max_size)
        };

        if !enabled {
            return DeadLetterOutcome::Rejected(DeadLetterRejection::Disabled);
        }

        let mut entries = self.entries.lock();
        if entries.len() >= max_size {
            return DeadLetterOutcome::Rejected(DeadLetterRejection::Full);
        }

        let timestamp = Utc::now();
        entries.push(DeadLetterEntry {
            message,
            error: error.to_string(),
            topic: topic.to_string(),
            retry_count,
            timestamp,
        });

        warn!(topic, retry_count, error, "message sent to DLQ");

        DeadLetterOutcome::Stored {
            error_message: error.to_string(),
            retry_count,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageHeaders;
    use serde_json::json;

    fn message(n: i64) -> Message {
        Message {
            id: format!("msg-{}", n),
            payload: json!({"n": n}),
            headers: MessageHeaders::new(),
            timestamp: Utc::now(),
            key: None,
            topic: Some("orders".to_string()),
            partition: None,
            offset: None,
        }
    }

    #[test]
    fn test_push_stores_entry() {
        let queue = DeadLetterQueue::default();
        let outcome = queue.push(message(1), "boom", "orders", 3);

        assert!(outcome.dead_lettered());
        assert_eq!(queue.len(), 1);
        let entries = queue.entries();
        assert_eq!(entries[0].error, "boom");
        assert_eq!(entries[0].retry_count, 3);
        assert_eq!(entries[0].topic, "orders");
    }

    #[test]
    fn test_rejects_when_disabled() {
        let queue = DeadLetterQueue::new(DeadLetterSettings {
            enabled: false,
            ..Default::default()
        });

        let outcome = queue.push(message(1), "boom", "orders", 1);
        assert_eq!(
            outcome,
            DeadLetterOutcome::Rejected(DeadLetterRejection::Disabled)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rejects_when_full() {
        let queue = DeadLetterQueue::new(DeadLetterSettings {
            max_size: 2,
            ..Default::default()
        });

        assert!(queue.push(message(1), "e1", "orders", 1).dead_lettered());
        assert!(queue.push(message(2), "e2", "orders", 2).dead_lettered());

        let outcome = queue.push(message(3), "e3", "orders", 3);
        assert_eq!(
            outcome,
            DeadLetterOutcome::Rejected(DeadLetterRejection::Full)
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_rejection_reason_strings() {
        assert_eq!(DeadLetterRejection::Disabled.to_string(), "DLQ_DISABLED");
        assert_eq!(DeadLetterRejection::Full.to_string(), "DLQ_FULL");
    }
}
