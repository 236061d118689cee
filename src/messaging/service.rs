//! Messaging facade
//!
//! Owns exactly one active adapter and delegates every operation to it with
//! no buffering or queuing of its own. An optional background loop
//! health-checks the adapter and runs a bounded reconnection routine when a
//! check comes back negative.

use crate::messaging::config::{ConsumerConfig, KafkaConfig, RedisStreamConfig, ServiceOptions};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::kafka::KafkaAdapter;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::redis_stream::RedisStreamAdapter;
use crate::messaging::types::{
    AdapterFeatures, MessageAdapter, MessageDraft, MessageHandler,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Which adapter the facade should run, with its connection settings
#[derive(Clone)]
pub enum AdapterSelection {
    Redis(RedisStreamConfig),
    Kafka(KafkaConfig),
    /// Caller-provided adapter instance, taken as already set up
    Custom(Arc<dyn MessageAdapter>),
}

impl std::fmt::Debug for AdapterSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterSelection::Redis(config) => f.debug_tuple("Redis").field(config).finish(),
            AdapterSelection::Kafka(config) => f.debug_tuple("Kafka").field(config).finish(),
            AdapterSelection::Custom(_) => f.debug_tuple("Custom").finish(),
        }
    }
}

/// Facade configuration: adapter choice plus service behavior
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub adapter: AdapterSelection,
    pub options: ServiceOptions,
}

impl MessagingConfig {
    pub fn new(adapter: AdapterSelection) -> Self {
        Self {
            adapter,
            options: ServiceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }
}

struct ServiceInner {
    adapter: RwLock<Option<Arc<dyn MessageAdapter>>>,
    config: RwLock<Option<MessagingConfig>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceInner {
    fn adapter(&self) -> MessagingResult<Arc<dyn MessageAdapter>> {
        self.adapter
            .read()
            .clone()
            .ok_or(MessagingError::NotConfigured)
    }
}

/// Unified entry point for produce/consume over the configured broker
pub struct MessagingService {
    inner: Arc<ServiceInner>,
}

impl Default for MessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                adapter: RwLock::new(None),
                config: RwLock::new(None),
                health_task: Mutex::new(None),
            }),
        }
    }

    /// Configure the service with the given adapter, replacing and
    /// disconnecting any previous one
    pub async fn configure(&self, config: MessagingConfig) -> MessagingResult<()> {
        self.disconnect().await?;

        let adapter = create_adapter(&config.adapter).await?;
        *self.inner.adapter.write() = Some(adapter);
        *self.inner.config.write() = Some(config.clone());

        if config.options.enable_health_check {
            self.start_health_check(&config.options);
        }
        Ok(())
    }

    /// The active adapter, for callers that need broker-specific extensions
    pub fn adapter(&self) -> MessagingResult<Arc<dyn MessageAdapter>> {
        self.inner.adapter()
    }

    /// Capability descriptor of the active adapter
    pub fn features(&self) -> MessagingResult<AdapterFeatures> {
        Ok(self.inner.adapter()?.features())
    }

    /// Produce a message to the topic, returning the broker-assigned id
    pub async fn produce(&self, topic: &str, draft: MessageDraft) -> MessagingResult<String> {
        let adapter = self.inner.adapter()?;
        let adapter_kind = adapter.features().kind.to_string();
        let start = Instant::now();

        let result = adapter.produce(topic, draft).await;

        match &result {
            Ok(_) => {
                MESSAGING_METRICS
                    .messages_produced
                    .with_label_values(&[topic, &adapter_kind])
                    .inc();
                MESSAGING_METRICS
                    .produce_latency
                    .with_label_values(&[topic, &adapter_kind])
                    .observe(start.elapsed().as_secs_f64());
            }
            Err(_) => {
                MESSAGING_METRICS
                    .produce_failures
                    .with_label_values(&[topic, &adapter_kind])
                    .inc();
            }
        }

        result
    }

    /// Install a message handler on the topic; runs until disconnect
    pub async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        config: Option<ConsumerConfig>,
    ) -> MessagingResult<()> {
        let adapter = self.inner.adapter()?;
        adapter.consume(topic, handler, config).await
    }

    pub async fn create_topic(&self, topic: &str) -> MessagingResult<()> {
        let adapter = self.inner.adapter()?;
        adapter.create_topic(topic).await
    }

    pub async fn delete_topic(&self, topic: &str) -> MessagingResult<()> {
        let adapter = self.inner.adapter()?;
        adapter.delete_topic(topic).await
    }

    /// True when an adapter is configured and its broker answers
    pub async fn health_check(&self) -> bool {
        match self.inner.adapter() {
            Ok(adapter) => adapter.health_check().await,
            Err(_) => false,
        }
    }

    /// Stop the health loop and disconnect the active adapter
    pub async fn disconnect(&self) -> MessagingResult<()> {
        if let Some(task) = self.inner.health_task.lock().take() {
            task.abort();
        }

        let adapter = self.inner.adapter.write().take();
        if let Some(adapter) = adapter {
            adapter.disconnect().await?;
        }
        Ok(())
    }

    /// Tear down and rebuild the adapter from the stored configuration
    pub async fn reconnect(&self) -> MessagingResult<()> {
        let config = self
            .inner
            .config
            .read()
            .clone()
            .ok_or(MessagingError::NotConfigured)?;
        self.configure(config).await
    }

    fn start_health_check(&self, options: &ServiceOptions) {
        let weak = Arc::downgrade(&self.inner);
        let interval = options.health_check_interval;
        let attempts = options.reconnect_attempts;
        let delay = options.reconnect_delay;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a freshly
            // configured adapter is not probed at once
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };

                let healthy = match inner.adapter() {
                    Ok(adapter) => adapter.health_check().await,
                    Err(_) => break,
                };

                if !healthy {
                    warn!("messaging health check failed, attempting reconnection");
                    attempt_reconnection(&inner, attempts, delay).await;
                }
            }
        });

        *self.inner.health_task.lock() = Some(task);
    }
}

/// Bounded reconnection: up to `attempts` tries with a fixed delay between
/// them; gives up silently (logging only) once exhausted.
async fn attempt_reconnection(inner: &Arc<ServiceInner>, attempts: u32, delay: std::time::Duration) {
    let Some(config) = inner.config.read().clone() else {
        return;
    };

    for attempt in 1..=attempts {
        info!(attempt, max_attempts = attempts, "reconnection attempt");

        let result = async {
            let previous = inner.adapter.write().take();
            if let Some(adapter) = previous {
                adapter.disconnect().await?;
            }
            let adapter = create_adapter(&config.adapter).await?;
            *inner.adapter.write() = Some(adapter);
            Ok::<_, MessagingError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(attempt, "reconnection successful");
                return;
            }
            Err(e) => {
                error!(attempt, error = %e, "reconnection attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    error!("all reconnection attempts failed");
}

async fn create_adapter(selection: &AdapterSelection) -> MessagingResult<Arc<dyn MessageAdapter>> {
    match selection {
        AdapterSelection::Redis(config) => {
            let adapter = RedisStreamAdapter::new(config.clone());
            adapter.connect().await?;
            Ok(Arc::new(adapter))
        }
        AdapterSelection::Kafka(config) => {
            let adapter = KafkaAdapter::new(config.clone());
            adapter.connect().await?;
            Ok(Arc::new(adapter))
        }
        AdapterSelection::Custom(provider) => Ok(provider.clone()),
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
    }
}
