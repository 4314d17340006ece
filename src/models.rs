//! Canonical data model shared by every exchange adapter, the storage
//! layer, and the query API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hours between funding settlements. An adapter that cannot determine the
/// interval MUST refuse to emit the record rather than guess.
pub const VALID_FUNDING_INTERVALS_HOURS: [i32; 4] = [1, 2, 4, 8];

/// Hours in a year, used for APR annualization.
const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    UsdM,
    CoinM,
    Perp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Linear,
    Inverse,
}

/// Which unit an adapter's `open_interest` value is expressed in, before
/// the storage layer normalizes it to USD at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenInterestUnit {
    Usd,
    BaseAsset,
}

/// Canonical contract record. Identity is `(exchange, symbol)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSnapshot {
    /// Venue name, lowercase (case-insensitive comparisons normalize here).
    pub exchange: String,
    /// Exchange-native symbol, exact string.
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Unitless rate applied once per funding interval. Positive means
    /// longs pay shorts.
    pub funding_rate: Decimal,
    pub funding_interval_hours: i32,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub open_interest_unit: OpenInterestUnit,
    pub contract_type: ContractType,
    pub market_type: MarketType,
    pub timestamp: DateTime<Utc>,
}

impl ContractSnapshot {
    /// `apr = funding_rate * (8760 / funding_interval_hours) * 100`,
    /// as a percent.
    pub fn apr(&self) -> Decimal {
        compute_apr(self.funding_rate, self.funding_interval_hours)
    }
}

/// Compute APR from a rate and interval, shared by adapters and by storage
/// so a record written at one site and read back at another always agrees.
pub fn compute_apr(funding_rate: Decimal, funding_interval_hours: i32) -> Decimal {
    if funding_interval_hours <= 0 {
        return Decimal::ZERO;
    }
    let periods_per_year =
        Decimal::from_f64_retain(HOURS_PER_YEAR).unwrap_or_default() / Decimal::from(funding_interval_hours);
    funding_rate * periods_per_year * Decimal::from(100)
}

/// Validate that an inferred/reported interval is one of the allowed
/// discrete values; adapters MUST NOT emit a record otherwise.
pub fn is_valid_funding_interval(hours: i32) -> bool {
    VALID_FUNDING_INTERVALS_HOURS.contains(&hours)
}

/// Given a raw timestamp delta (in hours) between two historical points,
/// round to the nearest valid funding interval member, or return `None` if
/// ambiguous (more than 5% away from every member).
pub fn infer_funding_interval_hours(delta_hours: f64) -> Option<i32> {
    let mut best: Option<(i32, f64)> = None;
    for &candidate in VALID_FUNDING_INTERVALS_HOURS.iter() {
        let rel_err = (delta_hours - candidate as f64).abs() / candidate as f64;
        if rel_err <= 0.05 {
            match best {
                Some((_, best_err)) if best_err <= rel_err => {}
                _ => best = Some((candidate, rel_err)),
            }
        }
    }
    best.map(|(hours, _)| hours)
}

/// Hours elapsed from `earlier` to `later`, for timestamp-delta inference
/// between two historical points of the same contract.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 3600.0
}

/// Historical record. Identity `(exchange, symbol, funding_time)`, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingPoint {
    pub exchange: String,
    pub symbol: String,
    pub funding_time: DateTime<Utc>,
    pub funding_rate: Decimal,
    pub mark_price: Option<Decimal>,
    pub funding_interval_hours: i32,
}

/// Rolling-window statistics record. Identity `(exchange, symbol)`, refreshed
/// in place rather than appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractStats {
    pub exchange: String,
    pub symbol: String,
    pub mean: Decimal,
    pub std_dev: Decimal,
    pub median: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub data_points: u32,
    /// `None` when `data_points < 3` or `std_dev == 0`.
    pub current_z_score: Option<f64>,
    pub current_percentile: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

/// Cross-exchange arbitrage spread. Identity
/// `(asset, long_exchange, short_exchange, observed_at)`, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spread {
    pub asset: String,
    pub long_exchange: String,
    pub long_symbol: String,
    pub long_rate: Decimal,
    pub long_interval_hours: i32,
    pub short_exchange: String,
    pub short_symbol: String,
    pub short_rate: Decimal,
    pub short_interval_hours: i32,
    pub rate_spread: Decimal,
    pub apr_spread: Decimal,
    pub sync_period_hours: i64,
    pub long_sync_funding: Decimal,
    pub short_sync_funding: Decimal,
    pub effective_hourly_spread: Decimal,
    pub daily_spread: Decimal,
    pub weekly_spread: Decimal,
    pub monthly_spread: Decimal,
    pub yearly_spread: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Per-contract metadata, as returned by `list_contracts` for backfill
/// planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractMeta {
    pub symbol: String,
    pub funding_interval_hours: i32,
    pub base_asset: String,
    pub quote_asset: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn apr_annualizes_rate_by_periods_per_year() {
        // rate=0.0001, interval=8h -> apr = 10.95%
        let apr = compute_apr(dec!(0.0001), 8);
        let expected = dec!(10.95);
        assert!((apr - expected).abs() < dec!(0.001));

        let apr2 = compute_apr(dec!(0.00009), 8);
        let expected2 = dec!(9.855);
        assert!((apr2 - expected2).abs() < dec!(0.001));
    }

    #[test]
    fn interval_inference_rounds_to_nearest_member() {
        assert_eq!(infer_funding_interval_hours(8.1), Some(8));
        assert_eq!(infer_funding_interval_hours(3.98), Some(4));
        assert_eq!(infer_funding_interval_hours(1.0), Some(1));
    }

    #[test]
    fn interval_inference_refuses_ambiguous_gap() {
        // 6 hours is nowhere close (>5%) to any of {1,2,4,8}.
        assert_eq!(infer_funding_interval_hours(6.0), None);
    }

    #[test]
    fn rejects_non_member_interval() {
        assert!(!is_valid_funding_interval(3));
        assert!(is_valid_funding_interval(8));
    }

    #[test]
    fn hours_between_computes_forward_delta() {
        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(8);
        assert!((hours_between(t0, t1) - 8.0).abs() < 1e-9);
    }
}
