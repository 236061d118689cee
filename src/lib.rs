//! # message-relay
//!
//! Broker-agnostic messaging with an attached resilience layer: one
//! produce/consume contract that runs identically over Redis Streams and
//! Kafka, plus a decision engine that classifies failures and chooses retry,
//! circuit-breaking, dead-lettering, or cached-fallback behavior.
//!
//! Delivery is at-least-once with caller-driven acknowledgment. Exactly-once
//! guarantees, schema registries, and transactional outboxes are explicitly
//! out of scope.
//!
//! ## Modules
//!
//! - [`messaging`]: message model, wire serializer, the adapter contract,
//!   the Redis Streams and Kafka adapters, and the facade that fronts them
//! - [`resilience`]: error classification, retry/backoff decisions, circuit
//!   breakers, the bounded dead-letter store, fallback and cache wrappers
//! - [`health`]: composite health reports and throughput/latency metrics
//!
//! The resilience layer is deliberately not wired into the adapters: routing
//! a caught error through [`resilience::ErrorHandler`] is an integration
//! responsibility of the caller, not an automatic guarantee.

pub mod health;
pub mod messaging;
pub mod resilience;

pub use health::{HealthMonitor, HealthReport, ServiceStatus};
pub use messaging::{
    AdapterFeatures, AdapterKind, Message, MessageAdapter, MessageDraft, MessageHandler,
    MessageHeaders, MessagingConfig, MessagingError, MessagingResult, MessagingService,
};
pub use resilience::{ErrorContext, ErrorDecision, ErrorHandler, Operation};
