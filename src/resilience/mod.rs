//! Resilience layer: classification, retry decisions, circuit breaking,
//! dead-lettering, fallbacks, and result caching
//!
//! The centerpiece is [`ErrorHandler`], a decision engine: callers route
//! caught exceptions through it and act on the returned [`ErrorDecision`].
//! Nothing here retries on its own, and nothing is wired automatically into
//! the adapters; integration is the caller's responsibility.
//!
//! ```
//! use message_relay::resilience::{ErrorContext, ErrorDecision, ErrorHandler, Operation};
//!
//! let handler = ErrorHandler::new();
//! let ctx = ErrorContext::new(Operation::Produce, 1).with_topic("orders");
//!
//! match handler.handle_error(&"Connection refused", &ctx) {
//!     ErrorDecision::Retry { delay, .. } => { /* sleep(delay) and retry */ }
//!     ErrorDecision::CircuitBreak { retry_after } => { /* back off */ }
//!     ErrorDecision::Fail { .. } => { /* dead-letter or surface */ }
//! }
//! ```

mod cache;
mod circuit;
mod classify;
mod dead_letter;
mod handler;

pub use cache::{CachedResult, ResultCache, DEFAULT_CACHE_TTL};
pub use circuit::{BreakerSnapshot, CircuitTracker, FAILURE_THRESHOLD, OPEN_TIMEOUT};
pub use classify::{classify_error, ErrorClassification, ErrorKind, Severity};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterOutcome, DeadLetterQueue, DeadLetterRejection, DeadLetterSettings,
};
pub use handler::{
    AlertHandler, CacheOutcome, CircuitOutcome, ErrorContext, ErrorDecision, ErrorHandler,
    ErrorPattern, ErrorReport, ErrorStatistics, FallbackFn, HealthAlert, HealthImpact,
    ImpactStatus, Operation, RecentError, TrendPoint, TrendRange,
};
