//! Health report and metric shapes

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Composite service status: the worse of adapter connectivity and
/// error-handler health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "HEALTHY"),
            ServiceStatus::Degraded => write!(f, "DEGRADED"),
            ServiceStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Adapter connectivity section of a report
#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub connected: bool,
    pub kind: String,
    pub features: Vec<&'static str>,
    pub last_check: DateTime<Utc>,
}

/// Counter section of a report
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetrics {
    pub messages_produced: u64,
    pub messages_consumed: u64,
    pub errors_count: u64,
    #[serde(skip)]
    pub uptime: Duration,
    pub average_response_time_ms: f64,
}

/// Read-only composite health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    pub adapter: AdapterHealth,
    pub metrics: ReportMetrics,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Cumulative throughput/latency metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub total_messages: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub average_response_time_ms: f64,
    /// Messages per second over the whole uptime
    pub throughput: f64,
    /// Errors over total messages
    pub error_rate: f64,
    #[serde(skip)]
    pub uptime: Duration,
    pub last_activity: DateTime<Utc>,
}

/// Estimated resource usage derived from message-volume counters, not real
/// OS metrics
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub cpu: f64,
    pub memory: f64,
    pub network_latency_ms: f64,
    pub queue_depth: u64,
    pub consumer_lag: u64,
    pub timestamp: DateTime<Utc>,
}
