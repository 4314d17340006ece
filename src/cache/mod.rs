//! Read-through TTL cache in front of storage.
//!
//! Cache errors are treated as non-critical and bypassed rather than
//! surfaced to the caller. This system embeds SQLite rather than running
//! a separate cache process, so the "primary" cache below is an
//! in-process sharded map and the "fallback" is a smaller bounded LRU
//! used whenever the primary reports itself unhealthy; both paths share
//! this one `Cache` type and the TTL policy, so a cache outage only
//! costs latency, never correctness.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;

/// Endpoint classes, each with its own default TTL and config override key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    AssetGrid,
    Statistics,
    Historical,
    Arbitrage,
}

impl EndpointClass {
    pub fn default_ttl(&self) -> Duration {
        match self {
            EndpointClass::AssetGrid => Duration::from_secs(5),
            EndpointClass::Statistics => Duration::from_secs(10),
            EndpointClass::Historical => Duration::from_secs(30),
            EndpointClass::Arbitrage => Duration::from_secs(5),
        }
    }

    /// Matches the `cache.ttl.*` config override keys.
    pub fn config_key(&self) -> &'static str {
        match self {
            EndpointClass::AssetGrid => "asset_grid",
            EndpointClass::Statistics => "statistics",
            EndpointClass::Historical => "historical",
            EndpointClass::Arbitrage => "arbitrage",
        }
    }
}

/// Which path served a read, for observability (`/api/health/performance`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    FallbackHit,
    FallbackMiss,
}

struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Deterministic cache key: hash of the endpoint path plus normalized
/// (sorted) query parameters.
pub fn cache_key(path: &str, params: &[(&str, &str)]) -> u64 {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    for (k, v) in sorted {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub fallback_reads: AtomicU64,
}

/// The shared, thread-safe cache. Eviction in the primary map is LRU with a hard byte
/// ceiling (`cache.max_bytes`); the fallback is a small bounded LRU that
/// only serves reads while `healthy` is false.
pub struct Cache {
    primary: Mutex<HashMap<u64, Entry>>,
    primary_order: Mutex<Vec<u64>>,
    fallback: Mutex<LruCache<u64, Entry>>,
    healthy: AtomicBool,
    max_bytes: u64,
    current_bytes: AtomicU64,
    pub counters: CacheCounters,
}

const FALLBACK_CAPACITY: usize = 512;

impl Cache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            primary: Mutex::new(HashMap::new()),
            primary_order: Mutex::new(Vec::new()),
            fallback: Mutex::new(LruCache::new(NonZeroUsize::new(FALLBACK_CAPACITY).unwrap())),
            healthy: AtomicBool::new(true),
            max_bytes,
            current_bytes: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    /// Serialize `value` as JSON and read it back through the cache under
    /// `key`, calling `fetch` on a miss and populating the result with
    /// `ttl`. This is the shape every query handler uses.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: u64, ttl: Duration, fetch: F) -> anyhow::Result<T>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if let Some(bytes) = self.get_raw(key) {
            if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                return Ok(value);
            }
        }

        let value = fetch().await?;
        if let Ok(bytes) = serde_json::to_vec(&value) {
            self.set_raw(key, bytes, ttl);
        }
        Ok(value)
    }

    fn get_raw(&self, key: u64) -> Option<Vec<u8>> {
        let now = Instant::now();
        if self.healthy.load(Ordering::Relaxed) {
            let primary = self.primary.lock();
            if let Some(entry) = primary.get(&key) {
                if entry.is_live(now) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.bytes.clone());
                }
            }
        }

        self.counters.fallback_reads.fetch_add(1, Ordering::Relaxed);
        let mut fallback = self.fallback.lock();
        if let Some(entry) = fallback.get(&key) {
            if entry.is_live(now) {
                return Some(entry.bytes.clone());
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set_raw(&self, key: u64, bytes: Vec<u8>, ttl: Duration) {
        let size = bytes.len() as u64;
        let expires_at = Instant::now() + ttl;

        if self.healthy.load(Ordering::Relaxed) {
            let mut primary = self.primary.lock();
            let mut order = self.primary_order.lock();

            while self.current_bytes.load(Ordering::Relaxed) + size > self.max_bytes {
                let Some(oldest_key) = (if order.is_empty() { None } else { Some(order.remove(0)) }) else {
                    break;
                };
                if let Some(evicted) = primary.remove(&oldest_key) {
                    self.current_bytes.fetch_sub(evicted.bytes.len() as u64, Ordering::Relaxed);
                }
            }

            if let Some(prev) = primary.insert(key, Entry { bytes, expires_at }) {
                self.current_bytes.fetch_sub(prev.bytes.len() as u64, Ordering::Relaxed);
            }
            order.retain(|k| *k != key);
            order.push(key);
            self.current_bytes.fetch_add(size, Ordering::Relaxed);
            return;
        }

        self.fallback.lock().put(key, Entry { bytes, expires_at });
    }

    /// Simulate the primary cache becoming unavailable; subsequent reads
    /// and writes route through the fallback LRU until [`Cache::mark_healthy`].
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Operator/TUI-facing manual flush.
    pub fn clear(&self) {
        self.primary.lock().clear();
        self.primary_order.lock().clear();
        self.current_bytes.store(0, Ordering::Relaxed);
        self.fallback.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn cache_key_is_order_independent_over_params() {
        let a = cache_key("/api/funding-rates-grid", &[("asset", "BTC"), ("limit", "10")]);
        let b = cache_key("/api/funding-rates-grid", &[("limit", "10"), ("asset", "BTC")]);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_by_path() {
        let a = cache_key("/api/funding-rates-grid", &[]);
        let b = cache_key("/api/arbitrage/opportunities", &[]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn get_or_fetch_populates_and_reuses_cache() {
        let cache = Cache::new(1024 * 1024);
        let key = cache_key("/api/test", &[]);
        let calls = std::sync::atomic::AtomicU32::new(0);

        let first: u32 = cache
            .get_or_fetch(key, StdDuration::from_secs(30), || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(42u32)
            })
            .await
            .unwrap();
        let second: u32 = cache
            .get_or_fetch(key, StdDuration::from_secs(30), || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(7u32)
            })
            .await
            .unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn falls_back_to_lru_when_primary_unhealthy() {
        let cache = Cache::new(1024 * 1024);
        cache.mark_unhealthy();
        let key = cache_key("/api/test", &[]);

        let value: u32 = cache
            .get_or_fetch(key, StdDuration::from_secs(30), || async { Ok(99u32) })
            .await
            .unwrap();
        assert_eq!(value, 99);

        // Served from the fallback LRU, not the primary map.
        assert!(cache.primary.lock().is_empty());
        assert!(!cache.fallback.lock().is_empty());
    }

    #[test]
    fn clear_empties_both_paths() {
        let cache = Cache::new(1024 * 1024);
        cache.set_raw(1, vec![1, 2, 3], StdDuration::from_secs(30));
        cache.mark_unhealthy();
        cache.set_raw(2, vec![4, 5, 6], StdDuration::from_secs(30));
        cache.clear();
        assert!(cache.get_raw(1).is_none());
        assert!(cache.get_raw(2).is_none());
    }

    #[test]
    fn eviction_respects_max_bytes_ceiling() {
        let cache = Cache::new(10);
        cache.set_raw(1, vec![0; 6], StdDuration::from_secs(30));
        cache.set_raw(2, vec![0; 6], StdDuration::from_secs(30));
        // First entry must have been evicted to keep total <= 10 bytes.
        assert!(cache.get_raw(1).is_none());
        assert!(cache.get_raw(2).is_some());
    }
}
