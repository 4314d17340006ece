//! Rolling statistics engine.
//!
//! Computes per-contract mean/std-dev/median/min/max/z-score/percentile
//! over a trailing 30-day window of `funding_history`, with zone-based
//! refresh to bound cost: contracts whose latest rate is more than two
//! standard deviations from the mean (or whose stats are stale past
//! [`ACTIVE_ZONE_STALE_AFTER`]) recompute every 30s; everything else every
//! 2 minutes. Work fans out across contracts on rayon's default pool,
//! since the mean/std-dev/median/z-score/percentile computation per
//! contract is independent and CPU-bound.

use crate::models::ContractStats;
use crate::storage::Storage;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rayon::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::{Data, Distribution, Max, Median, Min, OrderStatistics};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rolling window width.
const WINDOW_DAYS: i64 = 30;
/// Active-zone refresh cadence.
const ACTIVE_REFRESH_SECS: i64 = 30;
/// Stable-zone refresh cadence.
const STABLE_REFRESH_SECS: i64 = 120;
/// A contract not refreshed for this long is forced into the active zone
/// regardless of its last z-score, so a cold/stale row can't silently
/// linger at the 2-minute cadence forever.
const ACTIVE_ZONE_STALE_AFTER_SECS: i64 = 300;
/// Minimum data points for a non-null z-score/percentile.
const MIN_DATA_POINTS_FOR_ZSCORE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Active,
    Stable,
}

impl Zone {
    fn refresh_interval(self) -> ChronoDuration {
        match self {
            Zone::Active => ChronoDuration::seconds(ACTIVE_REFRESH_SECS),
            Zone::Stable => ChronoDuration::seconds(STABLE_REFRESH_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub considered: usize,
    pub refreshed: usize,
    pub active_zone: usize,
    pub stable_zone: usize,
    pub duration: std::time::Duration,
}

pub struct StatisticsEngine {
    storage: Arc<Storage>,
}

impl StatisticsEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Refresh every contract due for recomputation as of `now`. Target:
    /// full-population refresh in ≤ 1s on the reference fleet — achieved by only recomputing contracts whose zone cadence
    /// has elapsed, fanned out across rayon's default worker pool.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> anyhow::Result<RefreshSummary> {
        let started = std::time::Instant::now();
        let contracts = self.storage.distinct_historical_contracts()?;

        let mut zones = Vec::with_capacity(contracts.len());
        for (exchange, symbol) in &contracts {
            let zone = self.zone_for(exchange, symbol, now)?;
            if let Some(zone) = zone {
                zones.push((exchange.clone(), symbol.clone(), zone));
            }
        }

        let window_start = now - ChronoDuration::days(WINDOW_DAYS);
        let computed: Vec<Option<ContractStats>> = zones
            .par_iter()
            .map(|(exchange, symbol, _zone)| self.compute_one(exchange, symbol, window_start, now))
            .collect();

        let mut refreshed = 0;
        for stats in computed.into_iter().flatten() {
            self.storage.upsert_contract_stats(&stats)?;
            refreshed += 1;
        }

        let active_zone = zones.iter().filter(|(_, _, z)| *z == Zone::Active).count();
        let stable_zone = zones.len() - active_zone;

        let summary = RefreshSummary {
            considered: contracts.len(),
            refreshed,
            active_zone,
            stable_zone,
            duration: started.elapsed(),
        };
        if summary.duration > std::time::Duration::from_secs(1) {
            warn!(?summary.duration, "statistics refresh exceeded 1s target");
        } else {
            debug!(?summary, "statistics refresh complete");
        }
        Ok(summary)
    }

    /// `None` means not due yet; `Some(zone)` means due, tagged with which
    /// cadence governed it (for the summary's zone counts).
    fn zone_for(&self, exchange: &str, symbol: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Zone>> {
        let existing = self.storage.contract_stats(exchange, symbol)?;
        let Some(row) = existing else {
            return Ok(Some(Zone::Active));
        };

        let stale = now - row.last_updated >= ChronoDuration::seconds(ACTIVE_ZONE_STALE_AFTER_SECS);
        let in_active_band = row.current_z_score.map(|z| z.abs() >= 2.0).unwrap_or(true);
        let zone = if in_active_band || stale { Zone::Active } else { Zone::Stable };

        let due = now - row.last_updated >= zone.refresh_interval();
        Ok(if due { Some(zone) } else { None })
    }

    fn compute_one(
        &self,
        exchange: &str,
        symbol: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ContractStats> {
        let rates = self.storage.rates_in_window(exchange, symbol, window_start).ok()?;
        if rates.is_empty() {
            return None;
        }
        Some(compute_stats(exchange, symbol, &rates, now))
    }
}

/// Pure computation over a rate series (ascending by time), split out from
/// [`StatisticsEngine`] so it can be unit-tested without a database.
pub fn compute_stats(exchange: &str, symbol: &str, rates: &[Decimal], now: DateTime<Utc>) -> ContractStats {
    let floats: Vec<f64> = rates.iter().filter_map(|d| d.to_string().parse::<f64>().ok()).collect();
    let mut data = Data::new(floats.clone());

    let mean = data.mean().unwrap_or(0.0);
    let std_dev = data.std_dev().unwrap_or(0.0);
    let median = data.median();
    let min = data.min();
    let max = data.max();
    let latest = floats.last().copied().unwrap_or(0.0);
    let n = floats.len();

    let (z, percentile) = if n >= MIN_DATA_POINTS_FOR_ZSCORE && std_dev > 0.0 {
        let z = (latest - mean) / std_dev;
        let rank = floats.iter().filter(|&&x| x <= latest).count();
        let pct = rank as f64 / n as f64 * 100.0;
        (Some(z), Some(pct))
    } else {
        (None, None)
    };

    ContractStats {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        mean: Decimal::from_f64(mean).unwrap_or_default(),
        std_dev: Decimal::from_f64(std_dev).unwrap_or_default(),
        median: Decimal::from_f64(median).unwrap_or_default(),
        min: Decimal::from_f64(min).unwrap_or_default(),
        max: Decimal::from_f64(max).unwrap_or_default(),
        data_points: n as u32,
        current_z_score: z,
        current_percentile: percentile,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[f64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from_f64(*v).unwrap()).collect()
    }

    #[test]
    fn insufficient_data_points_yields_null_zscore() {
        let stats = compute_stats("binance", "BTCUSDT", &series(&[0.0001, 0.0002]), Utc::now());
        assert_eq!(stats.data_points, 2);
        assert!(stats.current_z_score.is_none());
        assert!(stats.current_percentile.is_none());
    }

    #[test]
    fn zero_std_dev_yields_null_zscore_even_with_enough_points() {
        let stats = compute_stats("binance", "BTCUSDT", &series(&[0.0001, 0.0001, 0.0001, 0.0001]), Utc::now());
        assert_eq!(stats.data_points, 4);
        assert!(stats.current_z_score.is_none());
    }

    #[test]
    fn zscore_matches_manual_formula() {
        let values = [0.0001, 0.0002, -0.0001, 0.0003, 0.0005];
        let stats = compute_stats("binance", "BTCUSDT", &series(&values), Utc::now());
        let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        let std_dev = var.sqrt();
        let expected_z = (values.last().unwrap() - mean) / std_dev;

        let z = stats.current_z_score.unwrap();
        assert!((z - expected_z).abs() < 1e-6, "z={z} expected={expected_z}");
    }

    #[test]
    fn latest_value_ranked_for_percentile() {
        let values = [0.0001, 0.0005, 0.0002, 0.0005];
        let stats = compute_stats("binance", "BTCUSDT", &series(&values), Utc::now());
        // latest = 0.0005, 4 of 4 values <= 0.0005 -> 100th percentile.
        assert_eq!(stats.current_percentile, Some(100.0));
    }
}
