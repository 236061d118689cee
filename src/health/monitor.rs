//! Composite health monitoring
//!
//! Polls the messaging facade and the error handler, folds in locally
//! accumulated counters, and produces a single report with the worse of
//! "adapter connectivity" and "error-handler health" as the overall status.

use crate::health::report::{
    AdapterHealth, HealthMetrics, HealthReport, PerformanceSnapshot, ReportMetrics, ServiceStatus,
};
use crate::messaging::MessagingService;
use crate::resilience::{ErrorHandler, ErrorStatistics, ImpactStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Bounded rolling history of performance snapshots
const MAX_HISTORY: usize = 100;

/// Degradation threshold for the estimated resource heuristics
const RESOURCE_PRESSURE_LIMIT: f64 = 80.0;

/// Error-rate threshold (fraction of total messages) before degrading
const ERROR_RATE_LIMIT: f64 = 0.1;

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    consumed: AtomicU64,
    errors: AtomicU64,
    total_response_micros: AtomicU64,
    response_samples: AtomicU64,
}

struct MonitorInner {
    service: Arc<MessagingService>,
    errors: Arc<ErrorHandler>,
    started_at: Instant,
    counters: Counters,
    last_activity: Mutex<DateTime<Utc>>,
    history: Mutex<VecDeque<PerformanceSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Aggregates facade connectivity, error-handler health, and local counters
/// into composite reports
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(service: Arc<MessagingService>, errors: Arc<ErrorHandler>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                service,
                errors,
                started_at: Instant::now(),
                counters: Counters::default(),
                last_activity: Mutex::new(Utc::now()),
                history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start periodic monitoring; a previous loop is replaced
    pub fn start_monitoring(&self, interval: Duration) {
        self.stop_monitoring();

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let report = perform_health_check(&inner).await;
                if report.status != ServiceStatus::Healthy {
                    error!(
                        status = %report.status,
                        issues = ?report.issues,
                        "health check reported problems"
                    );
                }
            }
        });

        *self.inner.task.lock() = Some(task);
        info!(interval_ms = interval.as_millis() as u64, "health monitoring started");
    }

    pub fn stop_monitoring(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            info!("health monitoring stopped");
        }
    }

    /// One full health check: adapter connectivity, error-handler impact,
    /// resource heuristics
    pub async fn perform_health_check(&self) -> HealthReport {
        perform_health_check(&self.inner).await
    }

    /// Cumulative throughput/latency metrics
    pub fn health_metrics(&self) -> HealthMetrics {
        let inner = &self.inner;
        let produced = inner.counters.produced.load(Ordering::Relaxed);
        let consumed = inner.counters.consumed.load(Ordering::Relaxed);
        let errors = inner.counters.errors.load(Ordering::Relaxed);
        let total = produced + consumed;
        let uptime = inner.started_at.elapsed();

        let throughput = if uptime.as_secs_f64() > 0.0 {
            total as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        let error_rate = if total > 0 {
            errors as f64 / total as f64
        } else {
            0.0
        };

        HealthMetrics {
            total_messages: total,
            successful_messages: total.saturating_sub(errors),
            failed_messages: errors,
            average_response_time_ms: average_response_ms(&inner.counters),
            throughput,
            error_rate,
            uptime,
            last_activity: *inner.last_activity.lock(),
        }
    }

    /// Current resource estimate; also appended to the rolling history
    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        take_performance_snapshot(&self.inner)
    }

    pub fn performance_history(&self) -> Vec<PerformanceSnapshot> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn record_produced(&self, response_time: Option<Duration>) {
        self.inner.counters.produced.fetch_add(1, Ordering::Relaxed);
        self.record_activity(response_time);
    }

    pub fn record_consumed(&self, response_time: Option<Duration>) {
        self.inner.counters.consumed.fetch_add(1, Ordering::Relaxed);
        self.record_activity(response_time);
    }

    pub fn record_error(&self) {
        self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero all counters and clear the history
    pub fn reset_metrics(&self) {
        let counters = &self.inner.counters;
        counters.produced.store(0, Ordering::Relaxed);
        counters.consumed.store(0, Ordering::Relaxed);
        counters.errors.store(0, Ordering::Relaxed);
        counters.total_response_micros.store(0, Ordering::Relaxed);
        counters.response_samples.store(0, Ordering::Relaxed);
        *self.inner.last_activity.lock() = Utc::now();
        self.inner.history.lock().clear();
    }

    /// Report plus metrics, performance, and raw error statistics in one shot
    pub async fn detailed_report(&self) -> DetailedHealthReport {
        let report = self.perform_health_check().await;
        let metrics = self.health_metrics();
        let performance = self.performance_snapshot();
        let error_statistics = self.inner.errors.error_statistics();

        let mut recommendations = report.recommendations.clone();
        recommendations.extend(performance_recommendations(&performance));

        DetailedHealthReport {
            report,
            metrics,
            performance,
            error_statistics,
            recommendations,
        }
    }

    /// Ready to take traffic: anything short of Unhealthy
    pub async fn is_ready(&self) -> bool {
        self.perform_health_check().await.status != ServiceStatus::Unhealthy
    }

    /// Liveness: the monitor can respond at all
    pub fn is_live(&self) -> bool {
        true
    }

    fn record_activity(&self, response_time: Option<Duration>) {
        *self.inner.last_activity.lock() = Utc::now();
        if let Some(elapsed) = response_time {
            self.inner
                .counters
                .total_response_micros
                .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
            self.inner
                .counters
                .response_samples
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Everything [`HealthMonitor::detailed_report`] returns
#[derive(Debug, Clone)]
pub struct DetailedHealthReport {
    pub report: HealthReport,
    pub metrics: HealthMetrics,
    pub performance: PerformanceSnapshot,
    pub error_statistics: ErrorStatistics,
    pub recommendations: Vec<String>,
}

fn average_response_ms(counters: &Counters) -> f64 {
    let samples = counters.response_samples.load(Ordering::Relaxed);
    if samples == 0 {
        return 0.0;
    }
    counters.total_response_micros.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
}

fn take_performance_snapshot(inner: &Arc<MonitorInner>) -> PerformanceSnapshot {
    let produced = inner.counters.produced.load(Ordering::Relaxed);
    let consumed = inner.counters.consumed.load(Ordering::Relaxed);
    let history_len = inner.history.lock().len();

    // Volume-derived estimates, not real OS metrics
    let cpu = ((produced + consumed) as f64 / 100.0).min(100.0);
    let memory = (history_len as f64 / MAX_HISTORY as f64 * 100.0).min(100.0);
    let queue_depth = produced.saturating_sub(consumed);
    let consumer_lag = queue_depth / 10;

    let snapshot = PerformanceSnapshot {
        cpu,
        memory,
        network_latency_ms: average_response_ms(&inner.counters),
        queue_depth,
        consumer_lag,
        timestamp: Utc::now(),
    };

    let mut history = inner.history.lock();
    if history.len() >= MAX_HISTORY {
        history.pop_front();
    }
    history.push_back(snapshot.clone());

    snapshot
}

async fn perform_health_check(inner: &Arc<MonitorInner>) -> HealthReport {
    let now = Utc::now();
    let mut status = ServiceStatus::Healthy;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    // Adapter connectivity
    let connected = inner.service.health_check().await;
    let (kind, features) = match inner.service.features() {
        Ok(features) => (features.kind.to_string(), features.features),
        Err(_) => ("unknown".to_string(), Vec::new()),
    };

    if !connected {
        status = ServiceStatus::Unhealthy;
        issues.push("Adapter is not connected".to_string());
        recommendations.push("Check adapter configuration and connectivity".to_string());
    }

    // Error-handler health; the worse status wins
    let impact = inner.errors.assess_health_impact();
    match impact.status {
        ImpactStatus::Critical => status = ServiceStatus::Unhealthy,
        ImpactStatus::Degraded => {
            if status == ServiceStatus::Healthy {
                status = ServiceStatus::Degraded;
            }
        }
        ImpactStatus::Healthy => {}
    }
    issues.extend(impact.issues);
    recommendations.extend(inner.errors.recovery_recommendations());

    // Resource pressure heuristics
    let performance = take_performance_snapshot(inner);
    if performance.cpu > RESOURCE_PRESSURE_LIMIT || performance.memory > RESOURCE_PRESSURE_LIMIT {
        if status == ServiceStatus::Healthy {
            status = ServiceStatus::Degraded;
        }
        issues.push("High resource usage detected".to_string());
        recommendations.push("Monitor system resources".to_string());
    }

    // Local error rate
    let produced = inner.counters.produced.load(Ordering::Relaxed);
    let consumed = inner.counters.consumed.load(Ordering::Relaxed);
    let errors = inner.counters.errors.load(Ordering::Relaxed);
    let total = produced + consumed;
    if total > 0 && errors as f64 / total as f64 > ERROR_RATE_LIMIT {
        if status == ServiceStatus::Healthy {
            status = ServiceStatus::Degraded;
        }
        issues.push("High error rate detected".to_string());
    }

    HealthReport {
        status,
        timestamp: now,
        adapter: AdapterHealth {
            connected,
            kind,
            features,
            last_check: now,
        },
        metrics: ReportMetrics {
            messages_produced: produced,
            messages_consumed: consumed,
            errors_count: errors,
            uptime: inner.started_at.elapsed(),
            average_response_time_ms: average_response_ms(&inner.counters),
        },
        issues,
        recommendations,
    }
}

fn performance_recommendations(performance: &PerformanceSnapshot) -> Vec<String> {
    let mut recommendations = Vec::new();

    if performance.cpu > RESOURCE_PRESSURE_LIMIT {
        recommendations.push("High CPU usage detected - consider scaling or optimizing".to_string());
    }
    if performance.memory > RESOURCE_PRESSURE_LIMIT {
        recommendations.push("High memory usage detected - investigate memory leaks".to_string());
    }
    if performance.network_latency_ms > 1000.0 {
        recommendations.push("High network latency - check network connectivity".to_string());
    }
    if performance.queue_depth > 1000 {
        recommendations.push("High queue depth - consider adding more consumers".to_string());
    }
    if performance.consumer_lag > 500 {
        recommendations.push("High consumer lag - optimize message processing".to_string());
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(
            Arc::new(MessagingService::new()),
            Arc::new(ErrorHandler::new()),
        )
    }

    #[tokio::test]
    async fn test_unconfigured_service_is_unhealthy() {
        let monitor = monitor();
        let report = monitor.perform_health_check().await;

        assert_eq!(report.status, ServiceStatus::Unhealthy);
        assert!(!report.adapter.connected);
        assert!(report
            .issues
            .contains(&"Adapter is not connected".to_string()));
        assert!(!monitor.is_ready().await);
        assert!(monitor.is_live());
    }

    #[tokio::test]
    async fn test_metrics_accumulate() {
        let monitor = monitor();
        monitor.record_produced(Some(Duration::from_millis(10)));
        monitor.record_produced(Some(Duration::from_millis(30)));
        monitor.record_consumed(None);
        monitor.record_error();

        let metrics = monitor.health_metrics();
        assert_eq!(metrics.total_messages, 3);
        assert_eq!(metrics.failed_messages, 1);
        assert_eq!(metrics.successful_messages, 2);
        assert!((metrics.average_response_time_ms - 20.0).abs() < 0.01);
        assert!((metrics.error_rate - 1.0 / 3.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_reset_metrics() {
        let monitor = monitor();
        monitor.record_produced(None);
        monitor.record_error();

        monitor.reset_metrics();
        let metrics = monitor.health_metrics();
        assert_eq!(metrics.total_messages, 0);
        assert_eq!(metrics.failed_messages, 0);
        assert!(monitor.performance_history().is_empty());
    }

    #[tokio::test]
    async fn test_queue_depth_estimate() {
        let monitor = monitor();
        for _ in 0..40 {
            monitor.record_produced(None);
        }
        for _ in 0..10 {
            monitor.record_consumed(None);
        }

        let snapshot = monitor.performance_snapshot();
        assert_eq!(snapshot.queue_depth, 30);
        assert_eq!(snapshot.consumer_lag, 3);
        assert_eq!(monitor.performance_history().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let monitor = monitor();
        for _ in 0..(MAX_HISTORY + 20) {
            monitor.performance_snapshot();
        }
        assert_eq!(monitor.performance_history().len(), MAX_HISTORY);
    }

    #[tokio::test]
    async fn test_detailed_report_merges_recommendations() {
        let monitor = monitor();
        let detailed = monitor.detailed_report().await;

        assert_eq!(detailed.report.status, ServiceStatus::Unhealthy);
        assert!(detailed
            .recommendations
            .contains(&"Check adapter configuration and connectivity".to_string()));
        assert_eq!(detailed.error_statistics.total_errors, 0);
    }

    #[tokio::test]
    async fn test_degraded_error_handler_degrades_report() {
        let service = Arc::new(MessagingService::new());
        let errors = Arc::new(ErrorHandler::new());
        for _ in 0..30 {
            errors.track_error(
                &"boom",
                crate::resilience::Operation::Produce,
                Some("orders"),
            );
        }
        let monitor = HealthMonitor::new(service, errors);

        // Unconfigured adapter already forces Unhealthy, which outranks the
        // handler's Degraded
        let report = monitor.perform_health_check().await;
        assert_eq!(report.status, ServiceStatus::Unhealthy);
    }
}
