//! Live collection scheduler.
//!
//! One supervisor task per adapter per tick, run either all at once
//! (`parallel`) or staggered by configured offsets (`sequential`), each
//! bounded by `max_cycle_duration`. A `tokio::interval` loop spawns one
//! task per enabled adapter every tick, joins them, and merges the
//! per-adapter reports into one cycle report so a slow or failing adapter
//! cannot stall the others.

pub mod dispatch;

use crate::cancellation::CancellationToken;
use crate::config::{CollectionMode, Config};
use crate::exchanges::{partition_valid_interval, AdapterReport, Exchange};
use crate::models::ContractSnapshot;
use crate::storage::Storage;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AdapterCycleReport {
    pub exchange: &'static str,
    pub duration: Duration,
    pub record_count: usize,
    pub failure_count: usize,
    /// Rate limiter tokens this adapter spent acquiring its requests this cycle.
    pub tokens_spent: u64,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub duration: Duration,
    pub per_adapter: Vec<AdapterCycleReport>,
    pub records_written: usize,
}

impl CycleReport {
    pub fn total_records(&self) -> usize {
        self.per_adapter.iter().map(|a| a.record_count).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.per_adapter.iter().map(|a| a.failure_count).sum()
    }
}

pub struct LiveScheduler {
    registry: Vec<Arc<dyn Exchange>>,
    storage: Arc<Storage>,
    tick: Duration,
    max_cycle_duration: Duration,
    mode: CollectionMode,
    offsets: Vec<Duration>,
}

impl LiveScheduler {
    pub fn new(registry: Vec<Arc<dyn Exchange>>, storage: Arc<Storage>, config: &Config) -> Self {
        let offsets = dispatch::compute_offsets(&registry, &config.collection.schedule);
        Self {
            registry,
            storage,
            tick: config.tick(),
            max_cycle_duration: config.max_cycle_duration(),
            mode: config.collection.mode,
            offsets,
        }
    }

    /// Run live cycles until `run_duration` elapses (if given) or `cancel`
    /// fires, finishing the in-flight cycle before stopping so a long run
    /// with a short tick never overshoots more than one cycle past the cap.
    pub async fn run(&self, run_duration: Option<Duration>, cancel: &CancellationToken) -> anyhow::Result<Vec<CycleReport>> {
        let run_started = Instant::now();
        let mut cycle_number = 0u64;
        let mut reports = Vec::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(limit) = run_duration {
                if run_started.elapsed() >= limit {
                    break;
                }
            }

            let tick_started = Instant::now();
            cycle_number += 1;
            let report = self.run_cycle(cycle_number, cancel).await?;
            info!(
                cycle = report.cycle_number,
                duration_ms = report.duration.as_millis(),
                records = report.records_written,
                failures = report.total_failures(),
                "live cycle complete"
            );
            reports.push(report);

            if cancel.is_cancelled() {
                break;
            }
            if let Some(limit) = run_duration {
                if run_started.elapsed() >= limit {
                    break;
                }
            }

            let elapsed = tick_started.elapsed();
            if elapsed < self.tick {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick - elapsed) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }

        Ok(reports)
    }

    async fn run_cycle(&self, cycle_number: u64, cancel: &CancellationToken) -> anyhow::Result<CycleReport> {
        let cycle_start = Instant::now();

        let mut handles = Vec::with_capacity(self.registry.len());
        for (adapter, offset) in self.registry.iter().zip(self.offsets.iter()) {
            let adapter = Arc::clone(adapter);
            let cancel = cancel.clone();
            let max_cycle_duration = self.max_cycle_duration;
            let offset = match self.mode {
                CollectionMode::Parallel => Duration::ZERO,
                CollectionMode::Sequential => *offset,
            };
            handles.push(tokio::spawn(async move {
                if !offset.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(offset) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                run_adapter_with_budget(adapter, max_cycle_duration, &cancel).await
            }));
        }

        let mut batch: Vec<ContractSnapshot> = Vec::new();
        let mut per_adapter = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((name, duration, snapshots, mut report, tokens_spent)) => {
                    let snapshots = partition_valid_interval(snapshots, &mut report);
                    per_adapter.push(AdapterCycleReport {
                        exchange: name,
                        duration,
                        record_count: snapshots.len(),
                        failure_count: report.failure_count(),
                        tokens_spent,
                    });
                    batch.extend(snapshots);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "adapter supervisor task panicked");
                }
            }
        }

        let now = Utc::now();
        let records_written = if batch.is_empty() {
            0
        } else {
            self.storage.upsert_snapshots(&batch, now)?
        };

        Ok(CycleReport {
            cycle_number,
            duration: cycle_start.elapsed(),
            per_adapter,
            records_written,
        })
    }
}

/// Run one adapter's `fetch()` inside a cancellable budget of
/// `max_cycle_duration`; a cycle that exceeds it is cancelled and reported
/// rather than allowed to block the rest of the scheduler.
async fn run_adapter_with_budget(
    adapter: Arc<dyn Exchange>,
    max_cycle_duration: Duration,
    cancel: &CancellationToken,
) -> (&'static str, Duration, Vec<ContractSnapshot>, AdapterReport, u64) {
    let name = adapter.name();
    let start = Instant::now();
    let limiter = adapter.rate_limiter();
    let acquires_before = limiter.counters.acquires.load(Ordering::Relaxed);

    let outcome = tokio::select! {
        res = tokio::time::timeout(max_cycle_duration, adapter.fetch(cancel)) => res,
        _ = cancel.cancelled() => {
            let mut report = AdapterReport::default();
            report.failure("cycle", false, "cancelled");
            let tokens_spent = limiter.counters.acquires.load(Ordering::Relaxed) - acquires_before;
            return (name, start.elapsed(), Vec::new(), report, tokens_spent);
        }
    };

    let tokens_spent = limiter.counters.acquires.load(Ordering::Relaxed) - acquires_before;
    match outcome {
        Ok((snapshots, report)) => (name, start.elapsed(), snapshots, report, tokens_spent),
        Err(_) => {
            let mut report = AdapterReport::default();
            report.failure(
                "cycle",
                true,
                format!("exceeded max_cycle_duration ({:?})", max_cycle_duration),
            );
            (name, start.elapsed(), Vec::new(), report, tokens_spent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, CollectionMode};
    use crate::models::{ContractType, FundingPoint, MarketType, OpenInterestUnit};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowAdapter {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exchange for SlowAdapter {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn rate_limiter(&self) -> Arc<crate::rate_limiter::RateLimiter> {
            crate::rate_limiter::RateLimiter::new(&crate::config::RateLimitConfig {
                capacity: 100,
                refill_per_sec: 100.0,
            })
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (Vec::new(), AdapterReport::default())
        }

        async fn fetch_historical(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> crate::error::Result<Vec<FundingPoint>> {
            Ok(Vec::new())
        }

        async fn list_contracts(&self, _cancel: &CancellationToken) -> crate::error::Result<Vec<crate::models::ContractMeta>> {
            Ok(Vec::new())
        }
    }

    struct TokenSpendingAdapter {
        limiter: Arc<crate::rate_limiter::RateLimiter>,
        acquires: u32,
    }

    #[async_trait]
    impl Exchange for TokenSpendingAdapter {
        fn name(&self) -> &'static str {
            "spender"
        }

        fn rate_limiter(&self) -> Arc<crate::rate_limiter::RateLimiter> {
            self.limiter.clone()
        }

        async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            for _ in 0..self.acquires {
                self.limiter.acquire(1, cancel).await.unwrap();
            }
            (Vec::new(), AdapterReport::default())
        }

        async fn fetch_historical(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> crate::error::Result<Vec<FundingPoint>> {
            Ok(Vec::new())
        }

        async fn list_contracts(&self, _cancel: &CancellationToken) -> crate::error::Result<Vec<crate::models::ContractMeta>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn run_adapter_with_budget_reports_tokens_spent_during_the_cycle() {
        let limiter = crate::rate_limiter::RateLimiter::new(&crate::config::RateLimitConfig {
            capacity: 100,
            refill_per_sec: 100.0,
        });
        let adapter: Arc<dyn Exchange> = Arc::new(TokenSpendingAdapter { limiter, acquires: 3 });
        let cancel = CancellationToken::new();
        let (_name, _duration, _snapshots, _report, tokens_spent) =
            run_adapter_with_budget(adapter, Duration::from_secs(5), &cancel).await;
        assert_eq!(tokens_spent, 3);
    }

    #[tokio::test]
    async fn adapter_exceeding_budget_is_cancelled_and_reported() {
        let adapter: Arc<dyn Exchange> = Arc::new(SlowAdapter {
            delay: Duration::from_millis(200),
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let cancel = CancellationToken::new();
        let (_name, _duration, snapshots, report, _tokens_spent) =
            run_adapter_with_budget(adapter, Duration::from_millis(20), &cancel).await;

        assert!(snapshots.is_empty());
        assert_eq!(report.failure_count(), 1);
    }

    #[tokio::test]
    async fn duration_control_stops_within_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let registry: Vec<Arc<dyn Exchange>> = vec![Arc::new(SlowAdapter {
            delay: Duration::from_millis(1),
            calls: calls.clone(),
        })];

        let mut config = Config::default();
        config.collection = CollectionConfig {
            mode: CollectionMode::Parallel,
            tick_seconds: 1,
            schedule: Vec::new(),
            max_cycle_duration_seconds: 5,
        };

        let scheduler = LiveScheduler::new(registry, storage, &config);
        let cancel = CancellationToken::new();
        let reports = scheduler
            .run(Some(Duration::from_millis(2500)), &cancel)
            .await
            .unwrap();

        // tick=1s, duration=2.5s -> 2 or 3 cycles, never more.
        assert!(reports.len() >= 2 && reports.len() <= 3, "got {} cycles", reports.len());
        let _ = ContractType::Linear;
        let _ = MarketType::UsdM;
        let _ = OpenInterestUnit::Usd;
    }
}
