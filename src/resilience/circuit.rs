//! Per-key circuit breaking
//!
//! One breaker per `operation:topic` key. A breaker opens after
//! [`FAILURE_THRESHOLD`] tracked failures and half-closes on read: the next
//! query after [`OPEN_TIMEOUT`] has elapsed resets it as a side effect, there
//! is no background timer.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Failures before a breaker opens
pub const FAILURE_THRESHOLD: u32 = 5;

/// Cooldown after which an open breaker resets on the next query
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BreakerEntry {
    failures: u32,
    last_failure: Instant,
    is_open: bool,
}

/// Read-only view of one breaker, for reports and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub failures: u32,
    pub is_open: bool,
}

/// Concurrent map of circuit breakers keyed by `operation:topic`
#[derive(Debug, Default)]
pub struct CircuitTracker {
    breakers: DashMap<String, BreakerEntry>,
}

impl CircuitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure for the key, opening the breaker at the threshold
    pub fn record_failure(&self, key: &str) {
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| BreakerEntry {
                failures: 0,
                last_failure: Instant::now(),
                is_open: false,
            });

        entry.failures += 1;
        entry.last_failure = Instant::now();
        if entry.failures >= FAILURE_THRESHOLD {
            entry.is_open = true;
        }
    }

    /// True only while the breaker is open and inside the cooldown window.
    /// Once the cooldown has elapsed the breaker resets (failures to zero,
    /// closed) as a side effect of this query.
    pub fn is_open(&self, key: &str) -> bool {
        let Some(mut entry) = self.breakers.get_mut(key) else {
            return false;
        };

        if !entry.is_open {
            return false;
        }

        if entry.last_failure.elapsed() > OPEN_TIMEOUT {
            entry.is_open = false;
            entry.failures = 0;
            return false;
        }

        true
    }

    /// Close the breaker and clear its failure count
    pub fn reset(&self, key: &str) {
        if let Some(mut entry) = self.breakers.get_mut(key) {
            entry.failures = 0;
            entry.is_open = false;
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(key).map(|entry| BreakerSnapshot {
            failures: entry.failures,
            is_open: entry.is_open,
        })
    }

    /// Keys of currently open breakers
    pub fn open_keys(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.is_open)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
