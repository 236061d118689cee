//! Short-lived result cache for the cache-fallback wrapper
//!
//! Keyed string → last successful result. Only the cache wrapper uses this;
//! the main produce/consume path never consults it. Failures are never
//! cached.

use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Default freshness window
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// One cached operation result
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub data: Value,
    pub success: bool,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CachedResult {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.success && self.age() < self.ttl
    }
}

/// Concurrent keyed store of cached results
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<String, CachedResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a successful result with the default TTL
    pub fn store(&self, key: &str, data: Value) {
        self.store_with(
            key,
            CachedResult {
                data,
                success: true,
                stored_at: Instant::now(),
                ttl: DEFAULT_CACHE_TTL,
            },
        );
    }

    /// Store a fully specified entry (custom TTL, or a failure marker)
    pub fn store_with(&self, key: &str, result: CachedResult) {
        self.entries.insert(key.to_string(), result);
    }

    /// A still-fresh successful result, if any
    pub fn get_fresh(&self, key: &str) -> Option<CachedResult> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.clone())
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fresh_success_is_returned() {
        let cache = ResultCache::new();
        cache.store("produce:orders", json!("msg-1"));

        let cached = cache.get_fresh("produce:orders").unwrap();
        assert_eq!(cached.data, json!("msg-1"));
        assert!(cached.success);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = ResultCache::new();
        assert!(cache.get_fresh("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_returned() {
        let cache = ResultCache::new();
        cache.store("k", json!(1));

        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_secs(1)).await;
        assert!(cache.get_fresh("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_ttl() {
        let cache = ResultCache::new();
        cache.store_with(
            "k",
            CachedResult {
                data: json!(1),
                success: true,
                stored_at: Instant::now(),
                ttl: Duration::from_secs(10),
            },
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get_fresh("k").is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get_fresh("k").is_none());
    }

    #[tokio::test]
    async fn test_failures_are_never_fresh() {
        let cache = ResultCache::new();
        cache.store_with(
            "k",
            CachedResult {
                data: json!(null),
                success: false,
                stored_at: Instant::now(),
                ttl: DEFAULT_CACHE_TTL,
            },
        );

        assert!(cache.get_fresh("k").is_none());
    }
}
