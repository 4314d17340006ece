//! Cross-exchange arbitrage spread scanner.
//!
//! Joins the latest live snapshot across venues by normalized `base_asset`,
//! pairs every two venues that both list it, and for each pair derives the
//! sync-period-aware spread quantities the query API exposes: pair venues,
//! compute the spread, keep it if it clears the configured threshold.

use crate::config::Config;
use crate::models::{compute_apr, Spread};
use crate::storage::queries::LiveRow;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct ArbitrageScanner {
    storage: Arc<Storage>,
    min_apr_spread: f64,
}

impl ArbitrageScanner {
    pub fn new(storage: Arc<Storage>, config: &Config) -> Self {
        Self {
            storage,
            min_apr_spread: config.arbitrage.min_apr_spread,
        }
    }

    /// Scan current live snapshots for cross-venue spreads, persist those
    /// clearing `min_apr_spread`, and return them.
    pub fn scan(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Spread>> {
        let rows = self.storage.latest_snapshots(None, None)?;
        let by_asset = group_by_asset(rows);

        let mut spreads = Vec::new();
        for (asset, legs) in &by_asset {
            for i in 0..legs.len() {
                for j in (i + 1)..legs.len() {
                    if let Some(spread) = pair_spread(asset, &legs[i], &legs[j], now) {
                        if spread.apr_spread.to_f64().unwrap_or(0.0) >= self.min_apr_spread {
                            spreads.push(spread);
                        }
                    }
                }
            }
        }

        if !spreads.is_empty() {
            self.storage.insert_spreads(&spreads)?;
            info!(count = spreads.len(), "arbitrage scan found spreads above threshold");
        }
        Ok(spreads)
    }
}

fn group_by_asset(rows: Vec<LiveRow>) -> BTreeMap<String, Vec<LiveRow>> {
    let mut map: BTreeMap<String, Vec<LiveRow>> = BTreeMap::new();
    for row in rows {
        map.entry(row.base_asset.clone()).or_default().push(row);
    }
    map
}

/// Greatest common divisor, for `lcm` below.
fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}

/// Least common multiple of the two legs' funding intervals: the shortest
/// window over which both complete an integer number of settlements.
fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a * b).abs() / gcd(a, b)
}

/// Derive the candidate spread between two venues' legs on the same asset,
/// choosing long/short so the expected carry is positive. Returns `None` if the two legs
/// report an identical rate (zero expected carry, not a real opportunity).
fn pair_spread(asset: &str, a: &LiveRow, b: &LiveRow, now: DateTime<Utc>) -> Option<Spread> {
    if a.funding_rate == b.funding_rate {
        return None;
    }

    let (long, short) = if a.funding_rate < b.funding_rate { (a, b) } else { (b, a) };

    let sync_period_hours = lcm(long.funding_interval_hours as i64, short.funding_interval_hours as i64);
    if sync_period_hours == 0 {
        return None;
    }

    let long_sync_funding = long.funding_rate * Decimal::from(sync_period_hours / long.funding_interval_hours as i64);
    let short_sync_funding = short.funding_rate * Decimal::from(sync_period_hours / short.funding_interval_hours as i64);

    let effective_hourly_spread = short.funding_rate / Decimal::from(short.funding_interval_hours)
        - long.funding_rate / Decimal::from(long.funding_interval_hours);

    let daily_spread = effective_hourly_spread * Decimal::from(24);
    let weekly_spread = daily_spread * Decimal::from(7);
    let monthly_spread = daily_spread * Decimal::from(30);
    let yearly_spread = daily_spread * Decimal::from(365);

    let rate_spread = short.funding_rate - long.funding_rate;
    let long_apr = compute_apr(long.funding_rate, long.funding_interval_hours);
    let short_apr = compute_apr(short.funding_rate, short.funding_interval_hours);
    let apr_spread = short_apr - long_apr;

    Some(Spread {
        asset: asset.to_string(),
        long_exchange: long.exchange.clone(),
        long_symbol: long.symbol.clone(),
        long_rate: long.funding_rate,
        long_interval_hours: long.funding_interval_hours,
        short_exchange: short.exchange.clone(),
        short_symbol: short.symbol.clone(),
        short_rate: short.funding_rate,
        short_interval_hours: short.funding_interval_hours,
        rate_spread,
        apr_spread,
        sync_period_hours,
        long_sync_funding,
        short_sync_funding,
        effective_hourly_spread,
        daily_spread,
        weekly_spread,
        monthly_spread,
        yearly_spread,
        observed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractType, MarketType};
    use rust_decimal_macros::dec;

    fn row(exchange: &str, symbol: &str, rate: Decimal, interval: i32) -> LiveRow {
        LiveRow {
            exchange: exchange.into(),
            symbol: symbol.into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            funding_rate: rate,
            funding_interval_hours: interval,
            apr: compute_apr(rate, interval),
            mark_price: None,
            index_price: None,
            open_interest_usd: None,
            contract_type: "linear".into(),
            market_type: "usd_m".into(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn sync_period_is_lcm_of_both_intervals_and_scales_funding_to_match() {
        let long = row("binance", "BTCUSDT", dec!(-0.0002), 8);
        let short = row("bybit", "BTCUSDT", dec!(0.0003), 4);
        let now = Utc::now();

        let spread = pair_spread("BTC", &long, &short, now).expect("should produce a spread");
        assert_eq!(spread.sync_period_hours, 8);
        assert_eq!(spread.long_sync_funding, dec!(-0.0002));
        assert_eq!(spread.short_sync_funding, dec!(0.0006));
        assert!((spread.daily_spread - dec!(0.0024)).abs() < dec!(0.00000001));
    }

    #[test]
    fn orders_long_short_by_sign_regardless_of_input_order() {
        let a = row("binance", "BTCUSDT", dec!(0.0003), 4);
        let b = row("bybit", "BTCUSDT", dec!(-0.0002), 8);
        let spread = pair_spread("BTC", &a, &b, Utc::now()).unwrap();
        assert_eq!(spread.long_exchange, "bybit");
        assert_eq!(spread.short_exchange, "binance");
    }

    #[test]
    fn identical_rates_produce_no_candidate() {
        let a = row("binance", "BTCUSDT", dec!(0.0001), 8);
        let b = row("bybit", "BTCUSDT", dec!(0.0001), 8);
        assert!(pair_spread("BTC", &a, &b, Utc::now()).is_none());
    }

    #[test]
    fn lcm_matches_expected_values() {
        assert_eq!(lcm(8, 4), 8);
        assert_eq!(lcm(1, 8), 8);
        assert_eq!(lcm(2, 4), 4);
    }
}
