//! Static handler registration
//!
//! Subscriptions are declared as an explicit `(topic, handler)` table
//! assembled at startup and installed in one pass, instead of being
//! discovered at runtime.

use crate::messaging::config::ConsumerConfig;
use crate::messaging::error::MessagingResult;
use crate::messaging::service::MessagingService;
use crate::messaging::types::MessageHandler;
use tracing::info;

struct Registration {
    topic: String,
    handler: MessageHandler,
    config: Option<ConsumerConfig>,
}

/// Table of topic subscriptions to install on a configured service
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simple tailing subscription
    pub fn register(&mut self, topic: impl Into<String>, handler: MessageHandler) -> &mut Self {
        self.registrations.push(Registration {
            topic: topic.into(),
            handler,
            config: None,
        });
        self
    }

    /// Add a subscription with explicit consumer settings (e.g. a group)
    pub fn register_with_config(
        &mut self,
        topic: impl Into<String>,
        handler: MessageHandler,
        config: ConsumerConfig,
    ) -> &mut Self {
        self.registrations.push(Registration {
            topic: topic.into(),
            handler,
            config: Some(config),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.registrations
            .iter()
            .map(|r| r.topic.as_str())
            .collect()
    }

    /// Install every registered handler on the service. Fails on the first
    /// subscription the adapter rejects.
    pub async fn start(&self, service: &MessagingService) -> MessagingResult<()> {
        for registration in &self.registrations {
            service
                .consume(
                    &registration.topic,
                    registration.handler.clone(),
                    registration.config.clone(),
                )
                .await?;
            info!(topic = %registration.topic, "handler installed");
        }
        Ok(())
    }
}
