//! Operation cache for read-only capability invocations.
//!
//! The reasoning engine frequently re-requests operations it has
//! already seen (read the same file, re-run the same search). Caching
//! those results skips the redundant work and keeps the loop fast.
//!
//! Only read-only capabilities are eligible, and only successful
//! results are stored; failures always re-execute. Entries expire by
//! TTL and by LRU once the cache is full. Concurrent requests for the
//! same key are single-flighted: one caller computes, the rest await
//! its result.

use forgeloop_core::capability::{InvocationRequest, InvocationResult};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A cached result with bookkeeping for TTL and LRU decisions.
struct CacheEntry {
    result: InvocationResult,
    created_at: Instant,
    last_used: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Lifetime counters, plus a per-iteration window the loop resets
/// before each dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub unique_operations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_operations as f64
        }
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// In-flight computation slots, one per key.
    in_flight: HashMap<String, Arc<Mutex<()>>>,
    lifetime: CacheStats,
    iteration: CacheStats,
}

/// TTL + capacity bounded cache keyed by operation signature.
pub struct OperationCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
    capacity: usize,
    /// Per-capability TTL overrides (volatile operations get shorter ones).
    ttl_overrides: HashMap<String, Duration>,
}

impl OperationCache {
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                lifetime: CacheStats::default(),
                iteration: CacheStats::default(),
            }),
            default_ttl,
            capacity,
            ttl_overrides: HashMap::new(),
        }
    }

    pub fn with_ttl_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.ttl_overrides = overrides;
        self
    }

    /// Cache key: SHA-256 over capability name + canonical parameters.
    pub fn key_for(request: &InvocationRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.signature().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up the request, or run `compute` and store a successful
    /// result. Returns the result and whether it was served from cache.
    ///
    /// `cacheable` is false for write capabilities; those bypass the
    /// cache entirely (no lookup, no store, no single-flight).
    pub async fn get_or_compute<F, Fut>(
        &self,
        request: &InvocationRequest,
        cacheable: bool,
        compute: F,
    ) -> (InvocationResult, bool)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = InvocationResult>,
    {
        if !cacheable {
            return (compute().await, false);
        }

        let key = Self::key_for(request);

        // Fast path plus slot acquisition under one lock.
        let slot = {
            let mut inner = self.inner.lock().await;
            inner.lifetime.total_operations += 1;
            inner.iteration.total_operations += 1;

            if let Some(entry) = inner.entries.get_mut(&key) {
                if entry.is_expired() {
                    inner.entries.remove(&key);
                } else {
                    entry.last_used = Instant::now();
                    let mut result = entry.result.clone();
                    result.cache_hit = true;
                    inner.lifetime.hits += 1;
                    inner.iteration.hits += 1;
                    trace!(capability = %request.capability_name, "Operation cache hit");
                    return (result, true);
                }
            }

            inner
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        // Serialize computations for this key. A waiter that acquires
        // the slot after the first caller finishes re-checks the cache
        // before computing.
        let _guard = slot.lock().await;

        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.entries.get_mut(&key) {
                if !entry.is_expired() {
                    entry.last_used = Instant::now();
                    let mut result = entry.result.clone();
                    result.cache_hit = true;
                    inner.lifetime.hits += 1;
                    inner.iteration.hits += 1;
                    return (result, true);
                }
                inner.entries.remove(&key);
            }
        }

        let result = compute().await;

        let mut inner = self.inner.lock().await;
        inner.lifetime.misses += 1;
        inner.iteration.misses += 1;

        if result.success {
            let ttl = self
                .ttl_overrides
                .get(&request.capability_name)
                .copied()
                .unwrap_or(self.default_ttl);

            self.evict_if_needed(&mut inner);
            let now = Instant::now();
            if inner
                .entries
                .insert(
                    key.clone(),
                    CacheEntry {
                        result: result.clone(),
                        created_at: now,
                        last_used: now,
                        ttl,
                    },
                )
                .is_none()
            {
                inner.lifetime.unique_operations += 1;
                inner.iteration.unique_operations += 1;
            }
            debug!(
                capability = %request.capability_name,
                entries = inner.entries.len(),
                "Cached operation result"
            );
        }

        inner.in_flight.remove(&key);
        (result, false)
    }

    /// Drop expired entries, then evict by LRU until under capacity.
    /// LRU ties break toward the oldest entry.
    fn evict_if_needed(&self, inner: &mut CacheInner) {
        inner.entries.retain(|_, entry| !entry.is_expired());

        while inner.entries.len() >= self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_used, e.created_at))
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Remove every cached entry, keeping stats.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn lifetime_stats(&self) -> CacheStats {
        self.inner.lock().await.lifetime
    }

    pub async fn iteration_stats(&self) -> CacheStats {
        self.inner.lock().await.iteration
    }

    /// Reset the per-iteration window; called before each dispatch round.
    pub async fn reset_iteration(&self) {
        self.inner.lock().await.iteration = CacheStats::default();
    }

    /// JSON view of lifetime stats, for the metrics surface.
    pub async fn stats_json(&self) -> serde_json::Value {
        let stats = self.lifetime_stats().await;
        json!({
            "total_operations": stats.total_operations,
            "hits": stats.hits,
            "misses": stats.misses,
            "unique_operations": stats.unique_operations,
            "hit_rate": stats.hit_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::capability::CapabilityOutput;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(name: &str, params: serde_json::Value) -> InvocationRequest {
        InvocationRequest::new(name, params, "turn-1")
    }

    fn ok_result(name: &str) -> InvocationResult {
        InvocationResult::from_output(name, CapabilityOutput::ok("fresh"), 5)
    }

    fn fail_result(name: &str) -> InvocationResult {
        InvocationResult::from_output(name, CapabilityOutput::fail("broken"), 5)
    }

    #[tokio::test]
    async fn second_lookup_hits() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let req = request("file_read", json!({"path": "a.rs"}));

        let (first, hit1) = cache
            .get_or_compute(&req, true, || async { ok_result("file_read") })
            .await;
        let (second, hit2) = cache
            .get_or_compute(&req, true, || async { panic!("must not recompute") })
            .await;

        assert!(!hit1);
        assert!(hit2);
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(second.output, "fresh");
    }

    #[tokio::test]
    async fn param_order_does_not_matter() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let a = request("code_search", json!({"query": "fn", "path": "src"}));
        let b = request("code_search", json!({"path": "src", "query": "fn"}));

        cache.get_or_compute(&a, true, || async { ok_result("code_search") }).await;
        let (_, hit) = cache
            .get_or_compute(&b, true, || async { panic!("same operation") })
            .await;
        assert!(hit);
    }

    #[tokio::test]
    async fn failures_are_not_stored() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let req = request("file_read", json!({"path": "missing.rs"}));

        let (_, hit1) = cache
            .get_or_compute(&req, true, || async { fail_result("file_read") })
            .await;
        let (_, hit2) = cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;

        assert!(!hit1);
        assert!(!hit2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn write_capabilities_bypass() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let req = request("file_write", json!({"path": "a.rs", "content": "x"}));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let (_, hit) = cache
                .get_or_compute(&req, false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ok_result("file_write")
                })
                .await;
            assert!(!hit);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty().await);
        assert_eq!(cache.lifetime_stats().await.total_operations, 0);
    }

    #[tokio::test]
    async fn expired_entries_recompute() {
        let cache = OperationCache::new(Duration::from_millis(20), 100);
        let req = request("file_read", json!({"path": "a.rs"}));

        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (_, hit) = cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        assert!(!hit);

        let stats = cache.lifetime_stats().await;
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = OperationCache::new(Duration::from_secs(300), 2);

        let a = request("file_read", json!({"path": "a.rs"}));
        let b = request("file_read", json!({"path": "b.rs"}));
        let c = request("file_read", json!({"path": "c.rs"}));

        cache.get_or_compute(&a, true, || async { ok_result("file_read") }).await;
        cache.get_or_compute(&b, true, || async { ok_result("file_read") }).await;
        // Touch `a` so `b` becomes the LRU victim.
        cache.get_or_compute(&a, true, || async { panic!("cached") }).await;
        cache.get_or_compute(&c, true, || async { ok_result("file_read") }).await;

        let (_, hit_a) = cache.get_or_compute(&a, true, || async { ok_result("file_read") }).await;
        let (_, hit_b) = cache.get_or_compute(&b, true, || async { ok_result("file_read") }).await;
        assert!(hit_a);
        assert!(!hit_b);
    }

    #[tokio::test]
    async fn single_flight_runs_compute_once() {
        let cache = Arc::new(OperationCache::new(Duration::from_secs(300), 100));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let req = request("code_search", json!({"query": "slow"}));
                cache
                    .get_or_compute(&req, true, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        ok_result("code_search")
                    })
                    .await
            }));
        }

        for handle in handles {
            let (result, _) = handle.await.unwrap();
            assert_eq!(result.output, "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn iteration_stats_reset_independently() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let req = request("file_read", json!({"path": "a.rs"}));

        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        cache.reset_iteration().await;
        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;

        let iteration = cache.iteration_stats().await;
        let lifetime = cache.lifetime_stats().await;
        assert_eq!(iteration.total_operations, 1);
        assert_eq!(iteration.hits, 1);
        assert_eq!(lifetime.total_operations, 3);
        assert_eq!(lifetime.hits, 2);
    }

    #[tokio::test]
    async fn hit_rate_reflects_traffic() {
        let cache = OperationCache::new(Duration::from_secs(300), 100);
        let req = request("file_read", json!({"path": "a.rs"}));

        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;
        cache.get_or_compute(&req, true, || async { ok_result("file_read") }).await;

        let stats = cache.lifetime_stats().await;
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.unique_operations, 1);

        let json = cache.stats_json().await;
        assert_eq!(json["total_operations"], 3);
        assert_eq!(json["hits"], 2);
    }

    #[tokio::test]
    async fn ttl_override_applies_per_capability() {
        let mut overrides = HashMap::new();
        overrides.insert("git_status".to_string(), Duration::from_millis(10));
        let cache =
            OperationCache::new(Duration::from_secs(300), 100).with_ttl_overrides(overrides);

        let volatile = request("git_status", json!({}));
        let stable = request("file_read", json!({"path": "a.rs"}));

        cache.get_or_compute(&volatile, true, || async { ok_result("git_status") }).await;
        cache.get_or_compute(&stable, true, || async { ok_result("file_read") }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (_, volatile_hit) = cache
            .get_or_compute(&volatile, true, || async { ok_result("git_status") })
            .await;
        let (_, stable_hit) = cache
            .get_or_compute(&stable, true, || async { panic!("still cached") })
            .await;
        assert!(!volatile_hit);
        assert!(stable_hit);
    }
}
