//! Conflict-aware parallel dispatch of capability invocations.
//!
//! Invocations parsed from one engine response are grouped greedily:
//! read-only requests always join the open batch, a write joins only if
//! its conflict key is disjoint from every key already in the batch,
//! and a write with no statically knowable target runs alone. Batches
//! execute in order; within a batch, calls run concurrently under a
//! semaphore. Results come back in request order regardless of how the
//! batch finished, and one failed call never takes its siblings down.

use forgeloop_core::capability::{
    CapabilityRegistry, InvocationRequest, InvocationResult, ResourceKey,
};
use forgeloop_core::error::CapabilityError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::OperationCache;

/// Counters describing how much dispatch parallelism bought us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Batches with more than one call.
    pub parallel_batches: u64,
    /// Calls executed inside parallel batches.
    pub total_parallel_calls: u64,
    /// Calls executed alone.
    pub total_sequential_calls: u64,
    /// Summed durations minus wall-clock time, across parallel batches.
    pub time_saved_ms: u64,
    /// Wall-clock milliseconds spent dispatching.
    pub total_wall_ms: u64,
    /// Summed per-call durations.
    pub total_work_ms: u64,
}

impl DispatchStats {
    /// Work time over wall time; 1.0 when nothing ran.
    pub fn speedup(&self) -> f64 {
        if self.total_wall_ms == 0 {
            1.0
        } else {
            self.total_work_ms as f64 / self.total_wall_ms as f64
        }
    }
}

/// Executes invocation batches against the registry, consulting the
/// operation cache for read-only calls.
pub struct ParallelDispatcher {
    registry: Arc<CapabilityRegistry>,
    cache: Arc<OperationCache>,
    semaphore: Arc<Semaphore>,
    invocation_timeout: Duration,
    stats: Mutex<DispatchStats>,
}

impl ParallelDispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        cache: Arc<OperationCache>,
        max_parallel: usize,
        invocation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            invocation_timeout,
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// Process all requests, returning results in request order.
    pub async fn dispatch(&self, requests: &[InvocationRequest]) -> Vec<InvocationResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let batches = self.plan_batches(requests);
        let mut indexed: Vec<(usize, InvocationResult)> = Vec::with_capacity(requests.len());

        for batch in batches {
            if batch.len() == 1 {
                let idx = batch[0];
                let result = self.execute_one(&requests[idx]).await;
                {
                    let mut stats = self.lock_stats();
                    stats.total_sequential_calls += 1;
                    stats.total_wall_ms += result.duration_ms;
                    stats.total_work_ms += result.duration_ms;
                }
                indexed.push((idx, result));
            } else {
                let started = Instant::now();
                let futures: Vec<_> = batch
                    .iter()
                    .map(|&idx| self.execute_bounded(&requests[idx]))
                    .collect();
                let batch_results = futures::future::join_all(futures).await;
                let wall = started.elapsed().as_millis() as u64;
                let work: u64 = batch_results.iter().map(|r| r.duration_ms).sum();

                {
                    let mut stats = self.lock_stats();
                    stats.parallel_batches += 1;
                    stats.total_parallel_calls += batch.len() as u64;
                    stats.total_wall_ms += wall;
                    stats.total_work_ms += work;
                    stats.time_saved_ms += work.saturating_sub(wall);
                }
                debug!(
                    calls = batch.len(),
                    wall_ms = wall,
                    saved_ms = work.saturating_sub(wall),
                    "Parallel batch complete"
                );

                for (&idx, result) in batch.iter().zip(batch_results) {
                    indexed.push((idx, result));
                }
            }
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Greedy order-preserving batch plan over request indices.
    fn plan_batches(&self, requests: &[InvocationRequest]) -> Vec<Vec<usize>> {
        let mut batches: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_keys: Vec<ResourceKey> = Vec::new();

        let close_current =
            |current: &mut Vec<usize>, keys: &mut Vec<ResourceKey>, batches: &mut Vec<Vec<usize>>| {
                if !current.is_empty() {
                    batches.push(std::mem::take(current));
                    keys.clear();
                }
            };

        for (idx, request) in requests.iter().enumerate() {
            let Some(capability) = self.registry.get(&request.capability_name) else {
                // Unknown capability: run alone so the failure surfaces
                // in its own slot.
                close_current(&mut current, &mut current_keys, &mut batches);
                batches.push(vec![idx]);
                continue;
            };

            if capability.is_read_only() {
                current.push(idx);
                continue;
            }

            match capability.conflict_key(&request.parameters) {
                Some(key) => {
                    if current_keys.contains(&key) {
                        close_current(&mut current, &mut current_keys, &mut batches);
                    }
                    current.push(idx);
                    current_keys.push(key);
                }
                None => {
                    // Ambiguous write target: serialize it.
                    close_current(&mut current, &mut current_keys, &mut batches);
                    batches.push(vec![idx]);
                }
            }
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    async fn execute_bounded(&self, request: &InvocationRequest) -> InvocationResult {
        let _permit = self.semaphore.acquire().await.ok();
        self.execute_one(request).await
    }

    async fn execute_one(&self, request: &InvocationRequest) -> InvocationResult {
        let cacheable = self
            .registry
            .get(&request.capability_name)
            .map(|c| c.is_read_only())
            .unwrap_or(false);

        let (result, _was_hit) = self
            .cache
            .get_or_compute(request, cacheable, || self.run_capability(request))
            .await;
        result
    }

    async fn run_capability(&self, request: &InvocationRequest) -> InvocationResult {
        let started = Instant::now();
        let invocation = self.registry.invoke(request);

        match tokio::time::timeout(self.invocation_timeout, invocation).await {
            Ok(Ok(output)) => {
                let duration = started.elapsed().as_millis() as u64;
                InvocationResult::from_output(&request.capability_name, output, duration)
            }
            Ok(Err(error)) => {
                let duration = started.elapsed().as_millis() as u64;
                warn!(capability = %request.capability_name, error = %error, "Invocation failed");
                InvocationResult::from_error(&request.capability_name, &error, duration)
            }
            Err(_) => {
                let duration = started.elapsed().as_millis() as u64;
                let error = CapabilityError::Timeout {
                    capability: request.capability_name.clone(),
                    timeout_secs: self.invocation_timeout.as_secs(),
                };
                warn!(capability = %request.capability_name, "Invocation timed out");
                InvocationResult::from_error(&request.capability_name, &error, duration)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        *self.lock_stats()
    }

    /// Drain the counters, returning what was accumulated.
    pub fn take_stats(&self) -> DispatchStats {
        std::mem::take(&mut *self.lock_stats())
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, DispatchStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
