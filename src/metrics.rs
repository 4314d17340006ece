//! Process-wide counters and the last-cycle gauge snapshot backing
//! `GET /api/health/performance`.
//!
//! Deliberately narrow: a handful of cheap `AtomicU64` counters plus one
//! `RwLock`-guarded snapshot of the most recent collection cycle, read at
//! request time from the cache and the exchange registry's own counters
//! rather than duplicated here. No Prometheus export, TUI, or profiling —
//! just what the health endpoint needs to answer.

use crate::cache::Cache;
use crate::exchanges::Exchange;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct AdapterCycleSnapshot {
    pub exchange: &'static str,
    pub duration_ms: u128,
    pub record_count: usize,
    pub failure_count: usize,
    pub tokens_spent: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastCycleSnapshot {
    pub cycle_number: u64,
    pub duration_ms: u128,
    pub records_written: usize,
    pub per_adapter: Vec<AdapterCycleSnapshot>,
}

impl From<&crate::scheduler::CycleReport> for LastCycleSnapshot {
    fn from(report: &crate::scheduler::CycleReport) -> Self {
        Self {
            cycle_number: report.cycle_number,
            duration_ms: report.duration.as_millis(),
            records_written: report.records_written,
            per_adapter: report
                .per_adapter
                .iter()
                .map(|a| AdapterCycleSnapshot {
                    exchange: a.exchange,
                    duration_ms: a.duration.as_millis(),
                    record_count: a.record_count,
                    failure_count: a.failure_count,
                    tokens_spent: a.tokens_spent,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CounterSnapshot {
    pub cycles_run: u64,
    pub cycle_failures: u64,
    pub backfill_runs: u64,
    pub arbitrage_scans: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_fallback_reads: u64,
    pub rate_limiter_acquires: u64,
    pub rate_limiter_blocks: u64,
    pub rate_limiter_penalties: u64,
}

#[derive(Default)]
pub struct Metrics {
    cycles_run: AtomicU64,
    cycle_failures: AtomicU64,
    backfill_runs: AtomicU64,
    arbitrage_scans: AtomicU64,
    last_cycle: RwLock<Option<LastCycleSnapshot>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, report: &crate::scheduler::CycleReport) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        if report.total_failures() > 0 {
            self.cycle_failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_cycle.write() = Some(LastCycleSnapshot::from(report));
    }

    pub fn record_backfill_run(&self) {
        self.backfill_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_arbitrage_scan(&self) {
        self.arbitrage_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_cycle(&self) -> Option<LastCycleSnapshot> {
        self.last_cycle.read().clone()
    }

    /// Snapshot this process's counters, reading the cache's and every
    /// registered adapter's rate limiter's own counters rather than
    /// mirroring them in a second set of atomics.
    pub fn counters(&self, cache: &Cache, registry: &[Arc<dyn Exchange>]) -> CounterSnapshot {
        let mut rate_limiter_acquires = 0u64;
        let mut rate_limiter_blocks = 0u64;
        let mut rate_limiter_penalties = 0u64;
        for adapter in registry {
            let limiter = adapter.rate_limiter();
            rate_limiter_acquires += limiter.counters.acquires.load(Ordering::Relaxed);
            rate_limiter_blocks += limiter.counters.blocks.load(Ordering::Relaxed);
            rate_limiter_penalties += limiter.counters.penalties.load(Ordering::Relaxed);
        }

        CounterSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
            backfill_runs: self.backfill_runs.load(Ordering::Relaxed),
            arbitrage_scans: self.arbitrage_scans.load(Ordering::Relaxed),
            cache_hits: cache.counters.hits.load(Ordering::Relaxed),
            cache_misses: cache.counters.misses.load(Ordering::Relaxed),
            cache_fallback_reads: cache.counters.fallback_reads.load(Ordering::Relaxed),
            rate_limiter_acquires,
            rate_limiter_blocks,
            rate_limiter_penalties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::config::RateLimitConfig;
    use crate::error::Result as ObsResult;
    use crate::exchanges::AdapterReport;
    use crate::models::{ContractMeta, ContractSnapshot, FundingPoint};
    use crate::rate_limiter::RateLimiter;
    use crate::scheduler::{AdapterCycleReport, CycleReport};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct StubAdapter {
        limiter: Arc<RateLimiter>,
    }

    #[async_trait]
    impl Exchange for StubAdapter {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn rate_limiter(&self) -> Arc<RateLimiter> {
            self.limiter.clone()
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            (Vec::new(), AdapterReport::default())
        }

        async fn fetch_historical(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> ObsResult<Vec<FundingPoint>> {
            Ok(Vec::new())
        }

        async fn list_contracts(&self, _cancel: &CancellationToken) -> ObsResult<Vec<ContractMeta>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new();
        let cache = Cache::new(1024 * 1024);
        let snap = metrics.counters(&cache, &[]);
        assert_eq!(snap.cycles_run, 0);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.rate_limiter_acquires, 0);
    }

    #[test]
    fn record_cycle_populates_last_cycle_and_counter() {
        let metrics = Metrics::new();
        let report = CycleReport {
            cycle_number: 3,
            duration: Duration::from_millis(120),
            per_adapter: vec![AdapterCycleReport {
                exchange: "binance",
                duration: Duration::from_millis(80),
                record_count: 42,
                failure_count: 0,
                tokens_spent: 5,
            }],
            records_written: 42,
        };
        metrics.record_cycle(&report);

        let cache = Cache::new(1024 * 1024);
        assert_eq!(metrics.counters(&cache, &[]).cycles_run, 1);
        let last = metrics.last_cycle().expect("snapshot recorded");
        assert_eq!(last.cycle_number, 3);
        assert_eq!(last.records_written, 42);
        assert_eq!(last.per_adapter[0].tokens_spent, 5);
    }

    #[test]
    fn cycle_with_failures_increments_failure_counter() {
        let metrics = Metrics::new();
        let report = CycleReport {
            cycle_number: 1,
            duration: Duration::from_millis(10),
            per_adapter: vec![AdapterCycleReport {
                exchange: "binance",
                duration: Duration::from_millis(10),
                record_count: 0,
                failure_count: 2,
                tokens_spent: 0,
            }],
            records_written: 0,
        };
        metrics.record_cycle(&report);
        let cache = Cache::new(1024 * 1024);
        assert_eq!(metrics.counters(&cache, &[]).cycle_failures, 1);
    }

    #[tokio::test]
    async fn cache_hit_miss_counters_read_through_from_the_cache_itself() {
        let metrics = Metrics::new();
        let cache = Cache::new(1024 * 1024);
        let key = crate::cache::cache_key("/api/test", &[]);
        let _: u32 = cache.get_or_fetch(key, Duration::from_secs(30), || async { Ok(1u32) }).await.unwrap();
        let _: u32 = cache.get_or_fetch(key, Duration::from_secs(30), || async { Ok(1u32) }).await.unwrap();

        let snap = metrics.counters(&cache, &[]);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[tokio::test]
    async fn rate_limiter_counters_aggregate_across_the_registry() {
        let metrics = Metrics::new();
        let cache = Cache::new(1024 * 1024);
        let limiter = RateLimiter::new(&RateLimitConfig { capacity: 10, refill_per_sec: 10.0 });
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();
        limiter.acquire(1, &cancel).await.unwrap();
        limiter.penalize(Duration::from_millis(1));

        let registry: Vec<Arc<dyn Exchange>> = vec![Arc::new(StubAdapter { limiter })];
        let snap = metrics.counters(&cache, &registry);
        assert_eq!(snap.rate_limiter_acquires, 2);
        assert_eq!(snap.rate_limiter_penalties, 1);
    }
}
