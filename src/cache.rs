//! Keyed result cache with single-flight admission.
//!
//! Two namespaces (`llm:`, `analysis:`) with independent TTLs so
//! invalidations can be targeted. Concurrent misses on the same key converge
//! on one in-flight computation; later arrivals block on the first to finish
//! and read its result. A backend failure downgrades to a cache miss and is
//! logged at warn, never surfaced to the pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use crate::error::Result;
use crate::fingerprint::{CacheKey, CacheNamespace};

/// Pluggable cache backend.
///
/// The in-memory implementation below is the default; a distributed store
/// can be promoted behind the same interface for multi-process deployments.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a value. `None` means miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>>;

    /// Store a value with the given time-to-live.
    async fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<()>;

    /// Statistics snapshot for health reporting. A backend that cannot
    /// answer reports an error, which health surfaces as degraded.
    async fn stats(&self) -> Result<CacheStats>;
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached LLM completions (default: 30 days)
    pub llm_ttl: Duration,
    /// TTL for cached analyzer outputs (default: 7 days)
    pub analysis_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            llm_ttl: Duration::days(30),
            analysis_ttl: Duration::days(7),
        }
    }
}

impl CacheConfig {
    /// Default TTL for a namespace.
    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        match namespace {
            CacheNamespace::Llm => self.llm_ttl,
            CacheNamespace::Analysis => self.analysis_ttl,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Hit rate over all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-process cache backend.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
    stats: RwLock<CacheStats>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Drop expired entries.
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);

        let mut stats = self.stats.write().await;
        stats.entry_count = entries.len() as u64;
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        let storage_key = key.storage_key();
        let found = {
            let entries = self.entries.read().await;
            entries
                .get(&storage_key)
                .filter(|e| e.expires_at > Utc::now())
                .map(|e| e.value.clone())
        };

        let mut stats = self.stats.write().await;
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        Ok(found)
    }

    async fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.storage_key(),
            StoredEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );

        let mut stats = self.stats.write().await;
        stats.entry_count = entries.len() as u64;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(self.stats.read().await.clone())
    }
}

/// At most one in-flight computation per key; duplicates share the result.
///
/// If the leading computation fails, its error goes to the caller that ran
/// it and one of the waiters takes over the flight.
pub struct SingleFlight<T: Clone> {
    inflight: StdMutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    /// Run `compute` under single-flight discipline for `key`.
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cell = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_try_init(compute).await.cloned();

        // The flight is over once a result (or error) is produced; completed
        // flights must not pin memory.
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.remove(key);

        result
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache front-end combining a backend store with single-flight admission
/// and miss-on-error downgrade.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    flights: SingleFlight<Value>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            flights: SingleFlight::new(),
        }
    }

    /// In-memory cache with default TTLs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), CacheConfig::default())
    }

    /// Backend statistics for health reporting.
    ///
    /// Unlike lookups, a backend error is NOT downgraded here; health wants
    /// to know the cache is unwell.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats().await
    }

    /// Look up a key, downgrading backend errors to a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store a value under the namespace's default TTL, ignoring backend errors.
    pub async fn put(&self, key: &CacheKey, value: Value) {
        let ttl = self.config.ttl_for(key.namespace);
        if let Err(e) = self.store.put(key, value, ttl).await {
            tracing::warn!(key = %key, error = %e, "cache store failed, continuing uncached");
        }
    }

    /// Cached computation with single-flight admission.
    ///
    /// On hit the stored value is returned without running `compute`. On miss
    /// concurrent callers for the same key share one computation, and the
    /// winner's result is written back.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(found) = self.get(key).await {
            return Ok(found);
        }

        let storage_key = key.storage_key();
        let value = self.flights.run(&storage_key, compute).await?;
        self.put(key, value.clone()).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fingerprint::Fingerprint;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(
            CacheNamespace::Analysis,
            Fingerprint::for_file(name, "python", b"content"),
        )
    }

    #[tokio::test]
    async fn test_memory_cache_hit_and_miss() {
        let cache = MemoryCache::new();
        let k = key("a.py");

        assert!(cache.get(&k).await.unwrap().is_none());

        cache
            .put(&k, serde_json::json!({"x": 1}), Duration::days(1))
            .await
            .unwrap();
        assert_eq!(
            cache.get(&k).await.unwrap(),
            Some(serde_json::json!({"x": 1}))
        );

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new();
        let k = key("a.py");

        cache
            .put(&k, serde_json::json!(1), Duration::zero())
            .await
            .unwrap();
        assert!(cache.get(&k).await.unwrap().is_none());

        cache.cleanup().await;
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_single_flight_runs_compute_once() {
        let cache = Arc::new(ResultCache::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("shared.py");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&k, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open long enough for all arrivals.
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(serde_json::json!("computed"))
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), serde_json::json!("computed"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Value>> {
            Err(Error::Storage("backend down".into()))
        }

        async fn put(&self, _key: &CacheKey, _value: Value, _ttl: Duration) -> Result<()> {
            Err(Error::Storage("backend down".into()))
        }

        async fn stats(&self) -> Result<CacheStats> {
            Err(Error::Storage("backend down".into()))
        }
    }

    #[tokio::test]
    async fn test_backend_error_downgrades_to_miss() {
        let cache = ResultCache::new(Arc::new(FailingStore), CacheConfig::default());
        let k = key("a.py");

        assert!(cache.get(&k).await.is_none());

        // Compute still runs and its result is returned despite the store
        // refusing the write-back.
        let value = cache
            .get_or_compute(&k, || async { Ok(serde_json::json!(42)) })
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(42));

        // Stats keep the error so health reporting sees the sick backend.
        assert!(cache.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_result_cache_stats_passthrough() {
        let cache = ResultCache::in_memory();
        let k = key("a.py");

        cache.get(&k).await;
        cache.put(&k, serde_json::json!(1)).await;
        cache.get(&k).await;

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
