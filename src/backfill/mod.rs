//! Historical backfill runner.
//!
//! For each enabled exchange, enumerates contracts via `list_contracts`,
//! plans a gap for each against what `funding_history` already holds, and
//! fetches the missing window with per-contract retry and exponential
//! backoff. Concurrency is bounded by a `Semaphore`-capped worker pool
//! since backfill fans out per-contract across every enabled exchange.

pub mod status;

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::exchanges::Exchange;
use crate::lock::FileLock;
use crate::models::{hours_between, infer_funding_interval_hours, is_valid_funding_interval, ContractMeta, FundingPoint};
use crate::storage::Storage;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use status::{read_status, write_status, BackfillState, BackfillStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Per-exchange concurrent contract backfills. Adapters already rate-limit
/// their own requests; this bounds how many of a venue's contracts are
/// in flight at once rather than firing `list_contracts().len()` tasks at
/// the limiter simultaneously.
const PER_EXCHANGE_CONCURRENCY: usize = 4;

pub struct BackfillRunner {
    registry: Vec<Arc<dyn Exchange>>,
    storage: Arc<Storage>,
    days: u32,
    max_retries: u32,
    base_backoff: Duration,
    lock_ttl: Duration,
    status_path: PathBuf,
    lock_path: PathBuf,
}

impl BackfillRunner {
    pub fn new(registry: Vec<Arc<dyn Exchange>>, storage: Arc<Storage>, config: &Config) -> Self {
        Self {
            registry,
            storage,
            days: config.historical.days,
            max_retries: config.historical.max_retries,
            base_backoff: Duration::from_secs(config.historical.base_backoff_seconds),
            lock_ttl: Duration::from_secs(config.historical.lock_ttl_seconds),
            status_path: PathBuf::from("backfill_status.json"),
            lock_path: PathBuf::from("backfill.lock"),
        }
    }

    /// Run a full backfill pass across every registered exchange's
    /// contracts, refusing to start a second concurrent run against the
    /// same status/lock files.
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<BackfillStatus> {
        let Some(_lock) = FileLock::acquire(&self.lock_path, self.lock_ttl)? else {
            anyhow::bail!("backfill already in progress (lock held at {})", self.lock_path.display());
        };

        let started_at = Utc::now();
        let window_end = started_at;
        let window_start = window_end - ChronoDuration::days(self.days as i64);

        let mut jobs: Vec<(Arc<dyn Exchange>, ContractMeta)> = Vec::new();
        for adapter in &self.registry {
            match adapter.list_contracts(cancel).await {
                Ok(contracts) => jobs.extend(contracts.into_iter().map(|c| (Arc::clone(adapter), c))),
                Err(e) => warn!(exchange = adapter.name(), error = %e, "could not list contracts for backfill"),
            }
        }

        let total = jobs.len() as u64;
        let mut status = BackfillStatus::new(total, started_at);
        write_status(&self.status_path, &status)?;
        info!(contracts = total, days = self.days, "backfill started");

        let semaphore = Arc::new(Semaphore::new(PER_EXCHANGE_CONCURRENCY * self.registry.len().max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for (adapter, contract) in jobs {
            let storage = Arc::clone(&self.storage);
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let max_retries = self.max_retries;
            let base_backoff = self.base_backoff;
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                backfill_one(adapter, storage, contract, window_start, window_end, max_retries, base_backoff, &cancel).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(filled)) => {
                    status.gaps_filled += filled;
                }
                Ok(Err((symbol, e))) => {
                    warn!(symbol, error = %e, "contract backfill exhausted retries");
                    status.incomplete_contracts.push(symbol);
                    status.errors.push(e.to_string());
                }
                Err(join_err) => {
                    status.errors.push(join_err.to_string());
                }
            }
            status.contracts_done += 1;
            status.progress = if total == 0 { 1.0 } else { status.contracts_done as f64 / total as f64 };
            status.updated_at = Utc::now();
            write_status(&self.status_path, &status)?;
        }

        status.state = if status.incomplete_contracts.is_empty() {
            BackfillState::Complete
        } else {
            BackfillState::Failed
        };
        status.updated_at = Utc::now();
        write_status(&self.status_path, &status)?;

        info!(
            gaps_filled = status.gaps_filled,
            incomplete = status.incomplete_contracts.len(),
            "backfill finished"
        );
        Ok(status)
    }

    /// Read the last-written status document without starting a run,
    /// self-healing a stuck `in_progress` document as it loads.
    pub fn status(&self) -> anyhow::Result<Option<BackfillStatus>> {
        read_status(&self.status_path)
    }
}

/// Backfill one contract: skip if `funding_history` already covers the
/// expected point count for its interval *within the current window*;
/// otherwise fetch the full window and retry on failure with doubling
/// backoff up to `max_retries`, bailing out to the caller's
/// `incomplete_contracts` list once exhausted.
async fn backfill_one(
    adapter: Arc<dyn Exchange>,
    storage: Arc<Storage>,
    contract: ContractMeta,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_retries: u32,
    base_backoff: Duration,
    cancel: &CancellationToken,
) -> Result<u64, (String, anyhow::Error)> {
    let exchange = adapter.name();
    let symbol = contract.symbol.clone();

    let existing = storage
        .existing_funding_times(exchange, &symbol)
        .map_err(|e| (symbol.clone(), e.into()))?;
    let existing_in_window = existing.iter().filter(|t| **t >= window_start && **t <= window_end).count();

    let window_hours = (window_end - window_start).num_hours().max(1);
    let expected_points = (window_hours / contract.funding_interval_hours.max(1) as i64).max(1) as usize;
    if existing_in_window >= expected_points {
        return Ok(0);
    }

    let mut attempt = 0u32;
    let mut backoff = base_backoff;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err((symbol, anyhow::anyhow!("cancelled")));
        }

        match adapter.fetch_historical(&symbol, window_start, window_end, cancel).await {
            Ok(points) => {
                let points = validate_historical_points(points);
                let inserted = storage.insert_historical(&points).map_err(|e| (symbol.clone(), e.into()))?;
                return Ok(inserted as u64);
            }
            Err(e) if attempt < max_retries => {
                warn!(exchange, symbol, attempt, error = %e, "backfill attempt failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err((symbol, anyhow::anyhow!("cancelled"))),
                }
                backoff = (backoff * 2).min(Duration::from_secs(64));
            }
            Err(e) => return Err((symbol, e.into())),
        }
    }
}

/// Validate and, where possible, correct each fetched point's funding
/// interval from the actual delta to its predecessor in the same series
/// rather than trusting the adapter's declared value, dropping any point
/// whose delta doesn't round unambiguously to a valid interval member. The
/// earliest point in the series has no predecessor to infer from and is
/// kept only if its own declared interval is already a valid member.
fn validate_historical_points(mut points: Vec<FundingPoint>) -> Vec<FundingPoint> {
    points.sort_by_key(|p| p.funding_time);

    let mut validated = Vec::with_capacity(points.len());
    let mut prev_time: Option<DateTime<Utc>> = None;
    for mut point in points {
        let inferred = match prev_time {
            Some(prev) => infer_funding_interval_hours(hours_between(prev, point.funding_time)),
            None if is_valid_funding_interval(point.funding_interval_hours) => Some(point.funding_interval_hours),
            None => None,
        };
        prev_time = Some(point.funding_time);
        if let Some(hours) = inferred {
            point.funding_interval_hours = hours;
            validated.push(point);
        }
    }
    validated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as ObsResult;
    use crate::exchanges::AdapterReport;
    use crate::models::{ContractSnapshot, FundingPoint};
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyAdapter {
        name: &'static str,
        fails_before_success: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exchange for FlakyAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn rate_limiter(&self) -> Arc<crate::rate_limiter::RateLimiter> {
            crate::rate_limiter::RateLimiter::new(&crate::config::RateLimitConfig {
                capacity: 10,
                refill_per_sec: 10.0,
            })
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            (Vec::new(), AdapterReport::default())
        }

        async fn fetch_historical(
            &self,
            symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> ObsResult<Vec<FundingPoint>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fails_before_success {
                return Err(crate::error::ObservatoryError::UpstreamRetryable("flaky".into()));
            }
            Ok(vec![FundingPoint {
                exchange: self.name.into(),
                symbol: symbol.into(),
                funding_time: Utc::now(),
                funding_rate: dec!(0.0001),
                mark_price: None,
                funding_interval_hours: 8,
            }])
        }

        async fn list_contracts(&self, _cancel: &CancellationToken) -> ObsResult<Vec<ContractMeta>> {
            Ok(vec![ContractMeta {
                symbol: "BTCUSDT".into(),
                funding_interval_hours: 8,
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
            }])
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let adapter: Arc<dyn Exchange> = Arc::new(FlakyAdapter {
            name: "binance",
            fails_before_success: 2,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let cancel = CancellationToken::new();
        let contract = ContractMeta {
            symbol: "BTCUSDT".into(),
            funding_interval_hours: 8,
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
        };

        let result = backfill_one(
            adapter,
            storage,
            contract,
            Utc::now() - ChronoDuration::days(30),
            Utc::now(),
            5,
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_reports_incomplete_contract() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let adapter: Arc<dyn Exchange> = Arc::new(FlakyAdapter {
            name: "binance",
            fails_before_success: 99,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let cancel = CancellationToken::new();
        let contract = ContractMeta {
            symbol: "BTCUSDT".into(),
            funding_interval_hours: 8,
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
        };

        let result = backfill_one(
            adapter,
            storage,
            contract,
            Utc::now() - ChronoDuration::days(30),
            Utc::now(),
            3,
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().0, "BTCUSDT");
    }

    #[tokio::test]
    async fn full_run_end_to_end_produces_complete_status() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let adapter: Arc<dyn Exchange> = Arc::new(FlakyAdapter {
            name: "binance",
            fails_before_success: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let mut config = Config::default();
        config.historical.days = 1;
        config.historical.max_retries = 3;
        config.historical.base_backoff_seconds = 0;

        let mut runner = BackfillRunner::new(vec![adapter], storage, &config);
        runner.status_path = dir.path().join("status.json");
        runner.lock_path = dir.path().join("backfill.lock");

        let cancel = CancellationToken::new();
        let status = runner.run(&cancel).await.unwrap();
        assert_eq!(status.state, BackfillState::Complete);
        assert_eq!(status.contracts_total, 1);
        assert!(status.incomplete_contracts.is_empty());
    }

    struct FixedPointAdapter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exchange for FixedPointAdapter {
        fn name(&self) -> &'static str {
            "binance"
        }

        fn rate_limiter(&self) -> Arc<crate::rate_limiter::RateLimiter> {
            crate::rate_limiter::RateLimiter::new(&crate::config::RateLimitConfig {
                capacity: 10,
                refill_per_sec: 10.0,
            })
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            (Vec::new(), AdapterReport::default())
        }

        async fn fetch_historical(
            &self,
            symbol: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> ObsResult<Vec<FundingPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut points = Vec::new();
            let mut t = end - ChronoDuration::hours(8);
            while t >= start {
                points.push(FundingPoint {
                    exchange: "binance".into(),
                    symbol: symbol.into(),
                    funding_time: t,
                    funding_rate: dec!(0.0001),
                    mark_price: None,
                    funding_interval_hours: 8,
                });
                t -= ChronoDuration::hours(8);
            }
            Ok(points)
        }

        async fn list_contracts(&self, _cancel: &CancellationToken) -> ObsResult<Vec<ContractMeta>> {
            Ok(vec![ContractMeta {
                symbol: "BTCUSDT".into(),
                funding_interval_hours: 8,
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
            }])
        }
    }

    #[tokio::test]
    async fn gap_plan_ignores_historical_rows_outside_the_current_window() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());

        let window_end = Utc::now();
        let window_start = window_end - ChronoDuration::days(1);

        // Plenty of historical rows, but every one of them predates the
        // current window by a year: they must not count toward this
        // window's expected point coverage.
        let stale_points: Vec<FundingPoint> = (0..50)
            .map(|i| FundingPoint {
                exchange: "binance".into(),
                symbol: "BTCUSDT".into(),
                funding_time: window_start - ChronoDuration::days(365) + ChronoDuration::hours(i * 8),
                funding_rate: dec!(0.0001),
                mark_price: None,
                funding_interval_hours: 8,
            })
            .collect();
        storage.insert_historical(&stale_points).unwrap();

        let adapter: Arc<dyn Exchange> = Arc::new(FlakyAdapter {
            name: "binance",
            fails_before_success: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let contract = ContractMeta {
            symbol: "BTCUSDT".into(),
            funding_interval_hours: 8,
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
        };
        let cancel = CancellationToken::new();

        let result = backfill_one(adapter, storage, contract, window_start, window_end, 3, Duration::from_millis(1), &cancel)
            .await
            .unwrap();
        assert_eq!(result, 1, "stale out-of-window rows must not short-circuit the current window's gap fetch");
    }

    #[tokio::test]
    async fn running_backfill_twice_back_to_back_fetches_nothing_new_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter: Arc<dyn Exchange> = Arc::new(FixedPointAdapter { calls: calls.clone() });
        let contract = ContractMeta {
            symbol: "BTCUSDT".into(),
            funding_interval_hours: 8,
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
        };
        let cancel = CancellationToken::new();
        let window_end = Utc::now();
        let window_start = window_end - ChronoDuration::hours(24);

        let first = backfill_one(
            adapter.clone(),
            storage.clone(),
            contract.clone(),
            window_start,
            window_end,
            3,
            Duration::from_millis(1),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(first, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = backfill_one(adapter, storage, contract, window_start, window_end, 3, Duration::from_millis(1), &cancel)
            .await
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "second run should skip via the windowed gap check, finding the prior rows, not guessing a count"
        );
    }
}
