//! Shared adapter plumbing
//!
//! Cross-cutting helpers every adapter composes in: the connected flag with
//! its fail-fast guard, message construction, and operation logging. Free of
//! any broker specifics.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::types::{Message, MessageDraft, HEADER_CONTENT_TYPE};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Connection-state and helper bundle composed into each adapter
#[derive(Debug)]
pub struct AdapterContext {
    name: &'static str,
    connected: AtomicBool,
}

impl AdapterContext {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        debug!(adapter = self.name, connected, "connection state changed");
    }

    /// Fail fast when used before a successful connect
    pub fn ensure_connected(&self) -> MessagingResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::NotConnected(self.name.to_string()))
        }
    }

    pub fn log_operation(&self, operation: &str, topic: &str, message_id: Option<&str>) {
        debug!(
            adapter = self.name,
            operation,
            topic,
            message_id = message_id.unwrap_or(""),
            "message operation"
        );
    }
}

/// Generate a unique message id in the `msg-<millis>-<suffix>` form
pub fn generate_message_id() -> String {
    format!(
        "msg-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Promote a draft to a full [`Message`], filling in id, timestamp, and the
/// default content type when absent
pub fn complete_message(draft: MessageDraft, id: Option<String>) -> Message {
    let mut headers = draft.headers;
    if headers.get(HEADER_CONTENT_TYPE).is_none() {
        headers.insert(HEADER_CONTENT_TYPE, "application/json");
    }

    Message {
        id: id.unwrap_or_else(generate_message_id),
        payload: draft.payload,
        headers,
        timestamp: Utc::now(),
        key: draft.key,
        topic: draft.topic,
        partition: draft.partition,
        offset: None,
    }
}
