//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages produced counter
    pub messages_produced: CounterVec,

    /// Messages consumed counter
    pub messages_consumed: CounterVec,

    /// Produce failures
    pub produce_failures: CounterVec,

    /// Consume failures
    pub consume_failures: CounterVec,

    /// Active adapter connections gauge
    pub active_connections: GaugeVec,

    /// Produce latency
    pub produce_latency: HistogramVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_produced: register_counter_vec!(
            "messaging_messages_produced_total",
            "Total number of messages produced",
            &["topic", "adapter"]
        )
        .unwrap(),

        messages_consumed: register_counter_vec!(
            "messaging_messages_consumed_total",
            "Total number of messages consumed",
            &["topic", "adapter"]
        )
        .unwrap(),

        produce_failures: register_counter_vec!(
            "messaging_produce_failures_total",
            "Total number of produce failures",
            &["topic", "adapter"]
        )
        .unwrap(),

        consume_failures: register_counter_vec!(
            "messaging_consume_failures_total",
            "Total number of consume failures",
            &["topic", "adapter"]
        )
        .unwrap(),

        active_connections: register_gauge_vec!(
            "messaging_active_connections",
            "Number of active adapter connections",
            &["adapter"]
        )
        .unwrap(),

        produce_latency: register_histogram_vec!(
            "messaging_produce_latency_seconds",
            "Message produce latency in seconds",
            &["topic", "adapter"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}
