//! Failure decision engine
//!
//! Classifies errors, tracks per-operation statistics, and decides between
//! retry, circuit-breaking, dead-lettering, fallback, or cached-result
//! behavior. It returns decisions rather than performing retries itself.
//!
//! The handler is not wired into the adapters: callers (or a wrapping layer)
//! must route caught errors through [`ErrorHandler::handle_error`] or one of
//! the `execute_with_*` wrappers to get resilience behavior.

use crate::messaging::{Message, MessageAdapter};
use crate::resilience::cache::{CachedResult, ResultCache};
use crate::resilience::circuit::{CircuitTracker, OPEN_TIMEOUT};
use crate::resilience::classify::{classify_error, ErrorClassification};
use crate::resilience::dead_letter::{DeadLetterOutcome, DeadLetterQueue, DeadLetterSettings};
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Tracked recent errors, oldest dropped first
const RECENT_ERRORS_CAP: usize = 100;

/// Window reported back in statistics
const RECENT_ERRORS_WINDOW: usize = 20;

/// Default retry ceiling when the caller does not supply one
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff
const BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// The messaging operation an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Produce,
    Consume,
    CreateTopic,
    DeleteTopic,
    Connect,
    Disconnect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Produce => "produce",
            Operation::Consume => "consume",
            Operation::CreateTopic => "createTopic",
            Operation::DeleteTopic => "deleteTopic",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
        };
        write!(f, "{}", name)
    }
}

/// Context the caller supplies with an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: Operation,
    pub topic: Option<String>,
    pub message_id: Option<String>,
    /// 1-indexed attempt number
    pub attempt: u32,
    pub max_retries: Option<u32>,
}

impl ErrorContext {
    pub fn new(operation: Operation, attempt: u32) -> Self {
        Self {
            operation,
            topic: None,
            message_id: None,
            attempt,
            max_retries: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// What the caller should do about an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Retry after the given delay (exponential backoff, base 1s)
    Retry { delay: Duration, max_retries: u32 },
    /// Give up
    Fail {
        retryable: bool,
        exceeded_max_retries: bool,
    },
    /// The circuit for this operation/topic is open; back off entirely
    CircuitBreak { retry_after: Duration },
}

/// One entry in the recent-error ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    pub error: String,
    pub operation: Operation,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated error statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub errors_by_operation: HashMap<String, u64>,
    pub errors_by_topic: HashMap<String, u64>,
    /// Most recent errors, newest last
    pub recent_errors: Vec<RecentError>,
}

/// Detected failure patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPattern {
    HighErrorRate,
    RepeatedConnectionErrors,
    TopicSpecificIssues(String),
}

impl fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPattern::HighErrorRate => write!(f, "HIGH_ERROR_RATE"),
            ErrorPattern::RepeatedConnectionErrors => write!(f, "REPEATED_CONNECTION_ERRORS"),
            ErrorPattern::TopicSpecificIssues(topic) => {
                write!(f, "TOPIC_SPECIFIC_ISSUES:{}", topic)
            }
        }
    }
}

/// Health status derived from error history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactStatus {
    Healthy,
    Degraded,
    Critical,
}

impl fmt::Display for ImpactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactStatus::Healthy => write!(f, "HEALTHY"),
            ImpactStatus::Degraded => write!(f, "DEGRADED"),
            ImpactStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Derived health assessment; computed on demand, never stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthImpact {
    pub status: ImpactStatus,
    pub score: u32,
    pub affected_operations: Vec<String>,
    pub issues: Vec<String>,
}

/// One point of an hourly error trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Time window for [`ErrorHandler::error_trends`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendRange {
    LastHour,
    LastDay,
    LastWeek,
}

impl TrendRange {
    fn as_duration(self) -> ChronoDuration {
        match self {
            TrendRange::LastHour => ChronoDuration::hours(1),
            TrendRange::LastDay => ChronoDuration::hours(24),
            TrendRange::LastWeek => ChronoDuration::days(7),
        }
    }
}

/// Rolled-up error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub total_errors: usize,
    pub errors_last_hour: usize,
    pub most_common_operation: String,
    pub most_common_topic: String,
    pub health_status: ImpactStatus,
    pub statistics: ErrorStatistics,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of the circuit-breaker wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitOutcome<T> {
    Completed(T),
    /// Short-circuited without calling the operation
    Rejected { retry_after: Duration },
}

/// Outcome of the cache wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome<T> {
    /// The operation ran and its result was cached
    Fresh(T),
    /// A still-fresh cached success was returned without running anything
    Cached { data: T, age: Duration },
}

/// Registered fallback for one operation, operating in JSON-value space
pub type FallbackFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Alert sink invoked on critical health
pub type AlertHandler = Arc<dyn Fn(HealthAlert) -> BoxFuture<'static, ()> + Send + Sync>;

/// Alert raised by [`ErrorHandler::check_and_send_alerts`]
#[derive(Debug, Clone)]
pub struct HealthAlert {
    pub message: String,
    pub impact: HealthImpact,
    pub timestamp: DateTime<Utc>,
}

/// The decision engine. One instance owns all resilience state; construct it
/// once and share it by reference wherever decisions are needed.
pub struct ErrorHandler {
    statistics: DashMap<String, u64>,
    recent: Mutex<VecDeque<RecentError>>,
    circuits: CircuitTracker,
    dead_letters: DeadLetterQueue,
    cache: ResultCache,
    fallbacks: RwLock<HashMap<String, FallbackFn>>,
    alert_handlers: RwLock<Vec<AlertHandler>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `operation:topic` key used for circuits and statistics
fn scoped_key(operation: Operation, topic: Option<&str>, fallback: &str) -> String {
    format!("{}:{}", operation, topic.unwrap_or(fallback))
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::with_dlq_settings(DeadLetterSettings::default())
    }

    pub fn with_dlq_settings(settings: DeadLetterSettings) -> Self {
        Self {
            statistics: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ERRORS_CAP)),
            circuits: CircuitTracker::new(),
            dead_letters: DeadLetterQueue::new(settings),
            cache: ResultCache::new(),
            fallbacks: RwLock::new(HashMap::new()),
            alert_handlers: RwLock::new(Vec::new()),
        }
    }

    /// The bounded dead-letter store owned by this handler
    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// The result cache owned by this handler
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Classify an error by its message text
    pub fn classify<E: fmt::Display>(&self, error: &E) -> ErrorClassification {
        classify_error(&error.to_string())
    }

    /// Decide what to do about an error. Always tracks it first.
    pub fn handle_error<E: fmt::Display>(&self, error: &E, ctx: &ErrorContext) -> ErrorDecision {
        let classification = self.classify(error);
        self.track_error(error, ctx.operation, ctx.topic.as_deref());

        let max_retries = ctx.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if ctx.attempt >= max_retries {
            return ErrorDecision::Fail {
                retryable: classification.retryable,
                exceeded_max_retries: true,
            };
        }

        let key = scoped_key(ctx.operation, ctx.topic.as_deref(), "default");
        if self.circuits.is_open(&key) {
            return ErrorDecision::CircuitBreak {
                retry_after: OPEN_TIMEOUT,
            };
        }

        if !classification.retryable {
            return ErrorDecision::Fail {
                retryable: false,
                exceeded_max_retries: false,
            };
        }

        let exponent = ctx.attempt.saturating_sub(1).min(32);
        let delay = BACKOFF_BASE * 2u32.saturating_pow(exponent);
        ErrorDecision::Retry { delay, max_retries }
    }

    /// Record an error into statistics, the recent ring, and the circuit
    /// breaker for its `operation:topic` key
    pub fn track_error<E: fmt::Display>(
        &self,
        error: &E,
        operation: Operation,
        topic: Option<&str>,
    ) {
        let stats_key = scoped_key(operation, topic, "unknown");
        *self.statistics.entry(stats_key).or_insert(0) += 1;

        {
            let mut recent = self.recent.lock();
            if recent.len() >= RECENT_ERRORS_CAP {
                recent.pop_front();
            }
            recent.push_back(RecentError {
                error: error.to_string(),
                operation,
                topic: topic.unwrap_or("unknown").to_string(),
                timestamp: Utc::now(),
            });
        }

        let circuit_key = scoped_key(operation, topic, "default");
        self.circuits.record_failure(&circuit_key);
    }

    /// Whether the circuit for `operation:topic` is currently open
    pub fn is_circuit_open(&self, operation: Operation, topic: Option<&str>) -> bool {
        self.circuits
            .is_open(&scoped_key(operation, topic, "default"))
    }

    /// Lifetime error count for one `operation:topic` key (unlike the recent
    /// ring, this counter is never truncated)
    pub fn error_count(&self, operation: Operation, topic: Option<&str>) -> u64 {
        self.statistics
            .get(&scoped_key(operation, topic, "unknown"))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Route a message that exhausted its retries to the dead-letter store
    pub fn handle_failed_message(
        &self,
        message: Message,
        error: &str,
        topic: &str,
        retry_count: u32,
    ) -> DeadLetterOutcome {
        self.dead_letters.push(message, error, topic, retry_count)
    }

    /// Register a fallback invoked by [`execute_with_fallback`] when the
    /// primary fails
    ///
    /// [`execute_with_fallback`]: ErrorHandler::execute_with_fallback
    pub fn set_fallback_handler(&self, operation: &str, fallback: FallbackFn) {
        self.fallbacks.write().insert(operation.to_string(), fallback);
    }

    /// Run the primary; on failure invoke the registered fallback for the
    /// operation with `args`, or rethrow when none is registered
    pub async fn execute_with_fallback<F, Fut>(
        &self,
        operation: &str,
        args: Vec<Value>,
        primary: F,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        match primary().await {
            Ok(value) => Ok(value),
            Err(err) => {
                let fallback = self.fallbacks.read().get(operation).cloned();
                match fallback {
                    Some(fallback) => {
                        warn!(operation, error = %err, "using fallback");
                        fallback(args).await
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Run an operation behind the circuit for `operation:topic`. An open
    /// circuit short-circuits without calling `f`; success resets the
    /// circuit, failure feeds it and rethrows.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut>(
        &self,
        operation: Operation,
        topic: Option<&str>,
        f: F,
    ) -> Result<CircuitOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = scoped_key(operation, topic, "default");

        if self.circuits.is_open(&key) {
            return Ok(CircuitOutcome::Rejected {
                retry_after: OPEN_TIMEOUT,
            });
        }

        match f().await {
            Ok(value) => {
                self.circuits.reset(&key);
                Ok(CircuitOutcome::Completed(value))
            }
            Err(err) => {
                self.circuits.record_failure(&key);
                Err(err)
            }
        }
    }

    /// Return a still-fresh cached success without calling `f`; otherwise run
    /// `f`, cache its success, and let failures propagate uncached
    pub async fn execute_with_cache<T, E, F, Fut>(
        &self,
        key: &str,
        f: F,
    ) -> Result<CacheOutcome<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.cache.get_fresh(key) {
            if let Ok(data) = serde_json::from_value::<T>(cached.data.clone()) {
                return Ok(CacheOutcome::Cached {
                    data,
                    age: cached.age(),
                });
            }
        }

        let value = f().await?;
        match serde_json::to_value(&value) {
            Ok(encoded) => self.cache.store(key, encoded),
            Err(e) => warn!(key, error = %e, "result not cacheable"),
        }
        Ok(CacheOutcome::Fresh(value))
    }

    /// Seed the cache directly (custom TTL or failure markers)
    pub fn set_cached_result(&self, key: &str, result: CachedResult) {
        self.cache.store_with(key, result);
    }

    /// Aggregated statistics over the recent-error ring
    pub fn error_statistics(&self) -> ErrorStatistics {
        let recent = self.recent.lock();

        let mut errors_by_operation: HashMap<String, u64> = HashMap::new();
        let mut errors_by_topic: HashMap<String, u64> = HashMap::new();
        for entry in recent.iter() {
            *errors_by_operation
                .entry(entry.operation.to_string())
                .or_insert(0) += 1;
            *errors_by_topic.entry(entry.topic.clone()).or_insert(0) += 1;
        }

        let window_start = recent.len().saturating_sub(RECENT_ERRORS_WINDOW);
        ErrorStatistics {
            total_errors: recent.len(),
            errors_by_operation,
            errors_by_topic,
            recent_errors: recent.iter().skip(window_start).cloned().collect(),
        }
    }

    /// Errors bucketed by hour over the given range
    pub fn error_trends(&self, range: TrendRange) -> Vec<TrendPoint> {
        let cutoff = Utc::now() - range.as_duration();
        let recent = self.recent.lock();

        let mut buckets: HashMap<DateTime<Utc>, u64> = HashMap::new();
        for entry in recent.iter().filter(|e| e.timestamp >= cutoff) {
            let bucket = entry
                .timestamp
                .duration_trunc(ChronoDuration::hours(1))
                .unwrap_or(entry.timestamp);
            *buckets.entry(bucket).or_insert(0) += 1;
        }

        let mut points: Vec<TrendPoint> = buckets
            .into_iter()
            .map(|(timestamp, count)| TrendPoint { timestamp, count })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        points
    }

    /// Detect failure patterns over the tracked history
    pub fn detect_error_patterns(&self) -> Vec<ErrorPattern> {
        let stats = self.error_statistics();
        let mut patterns = Vec::new();

        if stats.total_errors > 50 {
            patterns.push(ErrorPattern::HighErrorRate);
        }

        let connection_errors = stats
            .recent_errors
            .iter()
            .filter(|e| e.error.to_lowercase().contains("connection"))
            .count();
        if connection_errors > 10 {
            patterns.push(ErrorPattern::RepeatedConnectionErrors);
        }

        for (topic, count) in &stats.errors_by_topic {
            if *count > 20 {
                patterns.push(ErrorPattern::TopicSpecificIssues(topic.clone()));
            }
        }

        patterns
    }

    /// Score recent history into a health impact.
    ///
    /// Starts at 100; subtracts `min(total * 2, 50)`, then 20 for a high
    /// error rate and 30 for repeated connection errors; clamps at 0.
    /// Healthy at 80+, Degraded at 50+, Critical below.
    pub fn assess_health_impact(&self) -> HealthImpact {
        let stats = self.error_statistics();
        let patterns = self.detect_error_patterns();

        let mut penalty = (stats.total_errors as u32 * 2).min(50);
        let mut issues = Vec::new();

        if patterns.contains(&ErrorPattern::HighErrorRate) {
            penalty += 20;
            issues.push("High error rate detected".to_string());
        }
        if patterns.contains(&ErrorPattern::RepeatedConnectionErrors) {
            penalty += 30;
            issues.push("Repeated connection errors".to_string());
        }

        let score = 100u32.saturating_sub(penalty);
        let status = if score >= 80 {
            ImpactStatus::Healthy
        } else if score >= 50 {
            ImpactStatus::Degraded
        } else {
            ImpactStatus::Critical
        };

        let mut affected_operations: Vec<String> =
            stats.errors_by_operation.keys().cloned().collect();
        affected_operations.sort();

        HealthImpact {
            status,
            score,
            affected_operations,
            issues,
        }
    }

    /// Actionable recommendations derived from the detected patterns
    pub fn recovery_recommendations(&self) -> Vec<String> {
        let patterns = self.detect_error_patterns();
        let stats = self.error_statistics();
        let mut recommendations = Vec::new();

        if patterns.contains(&ErrorPattern::HighErrorRate) {
            recommendations.push("Consider implementing rate limiting".to_string());
            recommendations.push("Review error patterns and fix root causes".to_string());
        }
        if patterns.contains(&ErrorPattern::RepeatedConnectionErrors) {
            recommendations.push("Check network connectivity".to_string());
            recommendations.push("Verify broker configuration and availability".to_string());
        }

        let mut topics: Vec<_> = stats
            .errors_by_topic
            .iter()
            .filter(|(_, count)| **count > 10)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        for topic in topics {
            recommendations.push(format!("Investigate issues with topic: {}", topic));
        }

        if recommendations.is_empty() {
            recommendations.push("System appears to be functioning normally".to_string());
        }

        recommendations
    }

    /// Full error report: summary, statistics, recommendations
    pub fn error_report(&self) -> ErrorReport {
        let stats = self.error_statistics();
        let one_hour_ago = Utc::now() - ChronoDuration::hours(1);
        let errors_last_hour = self
            .recent
            .lock()
            .iter()
            .filter(|e| e.timestamp > one_hour_ago)
            .count();

        let most_common = |map: &HashMap<String, u64>| {
            map.iter()
                .max_by_key(|(_, count)| **count)
                .map(|(key, _)| key.clone())
                .unwrap_or_else(|| "none".to_string())
        };

        ErrorReport {
            total_errors: stats.total_errors,
            errors_last_hour,
            most_common_operation: most_common(&stats.errors_by_operation),
            most_common_topic: most_common(&stats.errors_by_topic),
            health_status: self.assess_health_impact().status,
            statistics: stats,
            recommendations: self.recovery_recommendations(),
            generated_at: Utc::now(),
        }
    }

    /// Disconnect, pause briefly, reconnect. Best-effort recovery for a
    /// wedged adapter.
    pub async fn attempt_recovery(&self, adapter: &dyn MessageAdapter) -> bool {
        let result = async {
            adapter.disconnect().await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            adapter.connect().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "recovery attempt failed");
                false
            }
        }
    }

    /// Immediate disconnect/connect cycle
    pub async fn reconnect_adapter(&self, adapter: &dyn MessageAdapter) -> bool {
        let result = async {
            adapter.disconnect().await?;
            adapter.connect().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "reconnection failed");
                false
            }
        }
    }

    /// Register an alert sink fired on critical health
    pub fn set_alert_handler(&self, handler: AlertHandler) {
        self.alert_handlers.write().push(handler);
    }

    /// Fire registered alert sinks when health is critical
    pub async fn check_and_send_alerts(&self) {
        let impact = self.assess_health_impact();
        if impact.status != ImpactStatus::Critical {
            return;
        }

        let alert = HealthAlert {
            message: "Critical messaging health issues detected".to_string(),
            impact,
            timestamp: Utc::now(),
        };

        let handlers: Vec<AlertHandler> = self.alert_handlers.read().clone();
        for handler in handlers {
            handler(alert.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_backoff_series() {
        let handler = ErrorHandler::new();

        for (attempt, expected_ms) in [(1u32, 1000u64), (2, 2000), (3, 4000)] {
            let ctx = ErrorContext::new(Operation::Produce, attempt)
                .with_topic("orders")
                .with_max_retries(5);
            let decision = handler.handle_error(&"Operation timeout", &ctx);
            assert_eq!(
                decision,
                ErrorDecision::Retry {
                    delay: Duration::from_millis(expected_ms),
                    max_retries: 5,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_exceeded_max_retries() {
        let handler = ErrorHandler::new();
        let ctx = ErrorContext::new(Operation::Produce, 5)
            .with_topic("orders")
            .with_max_retries(3);

        let decision = handler.handle_error(&"Operation timeout", &ctx);
        assert_eq!(
            decision,
            ErrorDecision::Fail {
                retryable: true,
                exceeded_max_retries: true,
            }
        );
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let handler = ErrorHandler::new();
        let ctx = ErrorContext::new(Operation::Produce, 1).with_topic("orders");

        let decision = handler.handle_error(&"JSON serialization failed", &ctx);
        assert_eq!(
            decision,
            ErrorDecision::Fail {
                retryable: false,
                exceeded_max_retries: false,
            }
        );
    }

    #[tokio::test]
    async fn test_open_circuit_yields_circuit_break() {
        let handler = ErrorHandler::new();

        // Five tracked failures open the circuit for produce:orders
        for _ in 0..5 {
            handler.track_error(&"Operation timeout", Operation::Produce, Some("orders"));
        }
        assert!(handler.is_circuit_open(Operation::Produce, Some("orders")));

        let ctx = ErrorContext::new(Operation::Produce, 1).with_topic("orders");
        let decision = handler.handle_error(&"Operation timeout", &ctx);
        assert_eq!(
            decision,
            ErrorDecision::CircuitBreak {
                retry_after: Duration::from_secs(60),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_auto_resets_after_cooldown() {
        let handler = ErrorHandler::new();
        for _ in 0..5 {
            handler.track_error(&"timeout", Operation::Consume, Some("audit"));
        }
        assert!(handler.is_circuit_open(Operation::Consume, Some("audit")));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!handler.is_circuit_open(Operation::Consume, Some("audit")));
    }

    #[tokio::test]
    async fn test_statistics_and_ring_cap() {
        let handler = ErrorHandler::new();
        for _ in 0..120 {
            handler.track_error(&"boom", Operation::Produce, Some("orders"));
        }

        let stats = handler.error_statistics();
        assert_eq!(stats.total_errors, 100);
        assert_eq!(stats.recent_errors.len(), 20);
        assert_eq!(stats.errors_by_operation.get("produce"), Some(&100));
        assert_eq!(stats.errors_by_topic.get("orders"), Some(&100));
    }

    #[tokio::test]
    async fn test_health_scoring_thirty_errors_is_degraded() {
        let handler = ErrorHandler::new();
        for _ in 0..30 {
            handler.track_error(&"boom", Operation::Produce, Some("orders"));
        }

        let impact = handler.assess_health_impact();
        assert_eq!(impact.score, 50);
        assert_eq!(impact.status, ImpactStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_scoring_connection_storm_is_critical() {
        let handler = ErrorHandler::new();
        for _ in 0..60 {
            handler.track_error(&"connection refused", Operation::Produce, Some("orders"));
        }

        // 50 (capped) + 20 (rate) + 30 (connection storm) => score 0
        let impact = handler.assess_health_impact();
        assert_eq!(impact.score, 0);
        assert_eq!(impact.status, ImpactStatus::Critical);
        assert_eq!(impact.issues.len(), 2);
    }

    #[tokio::test]
    async fn test_healthy_with_no_errors() {
        let handler = ErrorHandler::new();
        let impact = handler.assess_health_impact();
        assert_eq!(impact.score, 100);
        assert_eq!(impact.status, ImpactStatus::Healthy);
        assert!(impact.issues.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_invoked_on_failure() {
        let handler = ErrorHandler::new();
        handler.set_fallback_handler(
            "produce",
            Arc::new(|args| {
                Box::pin(async move { Ok(json!({"fallback": true, "args": args})) })
            }),
        );

        let result = handler
            .execute_with_fallback("produce", vec![json!("orders")], || async {
                Err(anyhow::anyhow!("primary failed"))
            })
            .await
            .unwrap();

        assert_eq!(result["fallback"], json!(true));
        assert_eq!(result["args"][0], json!("orders"));
    }

    #[tokio::test]
    async fn test_fallback_missing_rethrows() {
        let handler = ErrorHandler::new();
        let err = handler
            .execute_with_fallback("produce", vec![], || async {
                Err(anyhow::anyhow!("primary failed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "primary failed");
    }

    #[tokio::test]
    async fn test_fallback_not_used_on_success() {
        let handler = ErrorHandler::new();
        handler.set_fallback_handler(
            "produce",
            Arc::new(|_| Box::pin(async { Ok(json!("fallback")) })),
        );

        let result = handler
            .execute_with_fallback("produce", vec![], || async { Ok(json!("primary")) })
            .await
            .unwrap();
        assert_eq!(result, json!("primary"));
    }

    #[tokio::test]
    async fn test_circuit_wrapper_short_circuits_without_calling() {
        let handler = ErrorHandler::new();
        for _ in 0..5 {
            handler.track_error(&"boom", Operation::Produce, Some("orders"));
        }

        let calls = AtomicUsize::new(0);
        let outcome: CircuitOutcome<i32> = handler
            .execute_with_circuit_breaker(Operation::Produce, Some("orders"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(42)
            })
            .await
            .unwrap();

        assert!(matches!(outcome, CircuitOutcome::Rejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_wrapper_resets_on_success() {
        let handler = ErrorHandler::new();
        for _ in 0..4 {
            handler.track_error(&"boom", Operation::Produce, Some("orders"));
        }

        let outcome = handler
            .execute_with_circuit_breaker(Operation::Produce, Some("orders"), || async {
                Ok::<_, std::io::Error>("done")
            })
            .await
            .unwrap();
        assert_eq!(outcome, CircuitOutcome::Completed("done"));

        // The reset cleared the four accumulated failures: five more are
        // needed to open
        for _ in 0..4 {
            handler.track_error(&"boom", Operation::Produce, Some("orders"));
        }
        assert!(!handler.is_circuit_open(Operation::Produce, Some("orders")));
    }

    #[tokio::test]
    async fn test_circuit_wrapper_feeds_on_failure_and_rethrows() {
        let handler = ErrorHandler::new();

        for _ in 0..5 {
            let result: Result<CircuitOutcome<()>, std::io::Error> = handler
                .execute_with_circuit_breaker(Operation::Produce, Some("orders"), || async {
                    Err(std::io::Error::other("boom"))
                })
                .await;
            assert!(result.is_err());
        }

        assert!(handler.is_circuit_open(Operation::Produce, Some("orders")));
    }

    #[tokio::test]
    async fn test_cache_wrapper_returns_fresh_then_cached() {
        let handler = ErrorHandler::new();
        let calls = AtomicUsize::new(0);

        let first: CacheOutcome<String> = handler
            .execute_with_cache("health:report", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>("v1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(first, CacheOutcome::Fresh("v1".to_string()));

        let second: CacheOutcome<String> = handler
            .execute_with_cache("health:report", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>("v2".to_string())
            })
            .await
            .unwrap();
        assert!(matches!(second, CacheOutcome::Cached { data, .. } if data == "v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_wrapper_propagates_failures_uncached() {
        let handler = ErrorHandler::new();

        let result: Result<CacheOutcome<String>, std::io::Error> = handler
            .execute_with_cache("k", || async { Err(std::io::Error::other("down")) })
            .await;
        assert!(result.is_err());
        assert!(handler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_capacity() {
        let handler = ErrorHandler::with_dlq_settings(DeadLetterSettings {
            max_size: 2,
            ..Default::default()
        });

        let message = || Message {
            id: "m".to_string(),
            payload: json!(1),
            headers: crate::messaging::MessageHeaders::new(),
            timestamp: Utc::now(),
            key: None,
            topic: None,
            partition: None,
            offset: None,
        };

        assert!(handler
            .handle_failed_message(message(), "e1", "orders", 3)
            .dead_lettered());
        assert!(handler
            .handle_failed_message(message(), "e2", "orders", 3)
            .dead_lettered());

        let third = handler.handle_failed_message(message(), "e3", "orders", 3);
        assert_eq!(
            third,
            DeadLetterOutcome::Rejected(
                crate::resilience::dead_letter::DeadLetterRejection::Full
            )
        );
    }

    #[tokio::test]
    async fn test_recommendations_default() {
        let handler = ErrorHandler::new();
        let recommendations = handler.recovery_recommendations();
        assert_eq!(
            recommendations,
            vec!["System appears to be functioning normally".to_string()]
        );
    }

    #[tokio::test]
    async fn test_error_report_shape() {
        let handler = ErrorHandler::new();
        handler.track_error(&"timeout", Operation::Produce, Some("orders"));
        handler.track_error(&"timeout", Operation::Produce, Some("orders"));
        handler.track_error(&"timeout", Operation::Consume, Some("audit"));

        let report = handler.error_report();
        assert_eq!(report.total_errors, 3);
        assert_eq!(report.errors_last_hour, 3);
        assert_eq!(report.most_common_operation, "produce");
        assert_eq!(report.most_common_topic, "orders");
        assert_eq!(report.health_status, ImpactStatus::Healthy);
    }

    #[tokio::test]
    async fn test_alert_fired_on_critical() {
        let handler = ErrorHandler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        handler.set_alert_handler(Arc::new(move |_alert| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }));

        // Healthy: no alert
        handler.check_and_send_alerts().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        for _ in 0..60 {
            handler.track_error(&"connection refused", Operation::Produce, Some("orders"));
        }
        handler.check_and_send_alerts().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
