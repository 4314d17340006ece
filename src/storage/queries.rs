//! Read query methods over the schema in `storage::mod`:
//! single-symbol historical, asset grid, per-asset historical, statistics
//! view, and the raw rows the backfill runner and statistics engine need.
//!
//! Each method prepares a cached statement and maps rows into a typed
//! row struct rather than handing raw `rusqlite::Row`s to callers.

use super::Storage;
use crate::decimal::{from_storage_text, from_storage_text_opt, to_storage_text, to_storage_text_opt};
use crate::error::{ObservatoryError, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct LiveRow {
    pub exchange: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub funding_rate: Decimal,
    pub funding_interval_hours: i32,
    pub apr: Decimal,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub open_interest_usd: Option<Decimal>,
    pub contract_type: String,
    pub market_type: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalRow {
    pub funding_time: DateTime<Utc>,
    pub funding_rate: Decimal,
    pub mark_price: Option<Decimal>,
    pub funding_interval_hours: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridCell {
    pub funding_rate: Decimal,
    pub apr: Decimal,
    pub funding_interval_hours: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractStatsRow {
    pub exchange: String,
    pub symbol: String,
    pub mean: Decimal,
    pub std_dev: Decimal,
    pub median: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub data_points: u32,
    pub current_z_score: Option<f64>,
    pub current_percentile: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpreadRow {
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

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ObservatoryError::Storage(format!("bad timestamp '{raw}': {e}")))
}

impl Storage {
    /// Latest live snapshots, optionally filtered to one `base_asset`,
    /// optionally capped to `limit` rows. Only `is_active = 1` rows are
    /// returned, matching the "latest wins" live view contract.
    pub fn latest_snapshots(&self, base_asset: Option<&str>, limit: Option<usize>) -> Result<Vec<LiveRow>> {
        let conn = self.conn();
        let conn = conn.lock();
        let sql = match (base_asset.is_some(), limit.is_some()) {
            (true, true) => {
                "SELECT exchange, symbol, base_asset, quote_asset, funding_rate, funding_interval_hours, \
                 apr, mark_price, index_price, open_interest_usd, contract_type, market_type, observed_at \
                 FROM contracts_live WHERE is_active = 1 AND base_asset = ?1 ORDER BY base_asset, exchange LIMIT ?2"
            }
            (true, false) => {
                "SELECT exchange, symbol, base_asset, quote_asset, funding_rate, funding_interval_hours, \
                 apr, mark_price, index_price, open_interest_usd, contract_type, market_type, observed_at \
                 FROM contracts_live WHERE is_active = 1 AND base_asset = ?1 ORDER BY base_asset, exchange"
            }
            (false, true) => {
                "SELECT exchange, symbol, base_asset, quote_asset, funding_rate, funding_interval_hours, \
                 apr, mark_price, index_price, open_interest_usd, contract_type, market_type, observed_at \
                 FROM contracts_live WHERE is_active = 1 ORDER BY base_asset, exchange LIMIT ?1"
            }
            (false, false) => {
                "SELECT exchange, symbol, base_asset, quote_asset, funding_rate, funding_interval_hours, \
                 apr, mark_price, index_price, open_interest_usd, contract_type, market_type, observed_at \
                 FROM contracts_live WHERE is_active = 1 ORDER BY base_asset, exchange"
            }
        };

        let mut stmt = conn.prepare_cached(sql).map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, String, String, String, String, i32, String, Option<String>, Option<String>, Option<String>, String, String, String)> {
            Ok((
                row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
                row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?,
            ))
        };

        let raw_rows: Vec<_> = match (base_asset, limit) {
            (Some(asset), Some(lim)) => stmt
                .query_map(params![asset, lim as i64], map_row)
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?,
            (Some(asset), None) => stmt
                .query_map(params![asset], map_row)
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?,
            (None, Some(lim)) => stmt
                .query_map(params![lim as i64], map_row)
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?,
            (None, None) => stmt
                .query_map([], map_row)
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ObservatoryError::Storage(e.to_string()))?,
        };

        raw_rows
            .into_iter()
            .map(|(exchange, symbol, base_asset, quote_asset, rate, interval, apr, mark, index, oi, ctype, mtype, observed_at)| {
                Ok(LiveRow {
                    exchange,
                    symbol,
                    base_asset,
                    quote_asset,
                    funding_rate: from_storage_text(&rate)?,
                    funding_interval_hours: interval,
                    apr: from_storage_text(&apr)?,
                    mark_price: from_storage_text_opt(mark)?,
                    index_price: from_storage_text_opt(index)?,
                    open_interest_usd: from_storage_text_opt(oi)?,
                    contract_type: ctype,
                    market_type: mtype,
                    observed_at: parse_timestamp(&observed_at)?,
                })
            })
            .collect()
    }

    /// Asset grid: latest per `(exchange, base_asset)` aggregated across
    /// contracts, keyed `base_asset -> venue -> cell`.
    pub fn asset_grid(&self) -> Result<BTreeMap<String, BTreeMap<String, GridCell>>> {
        let rows = self.latest_snapshots(None, None)?;
        let mut grid: BTreeMap<String, BTreeMap<String, GridCell>> = BTreeMap::new();
        for row in rows {
            grid.entry(row.base_asset).or_default().insert(
                row.exchange,
                GridCell {
                    funding_rate: row.funding_rate,
                    apr: row.apr,
                    funding_interval_hours: row.funding_interval_hours,
                },
            );
        }
        Ok(grid)
    }

    /// Single-symbol historical series, newest first, optionally capped.
    pub fn historical_by_contract(
        &self,
        exchange: &str,
        symbol: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoricalRow>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT funding_time, funding_rate, mark_price, funding_interval_hours \
                 FROM funding_history WHERE exchange = ?1 AND symbol = ?2 AND funding_time >= ?3 \
                 ORDER BY funding_time DESC LIMIT ?4",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        let lim = limit.unwrap_or(10_000) as i64;
        let rows = stmt
            .query_map(params![exchange, symbol, since.to_rfc3339(), lim], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i32>(3)?,
                ))
            })
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(time, rate, mark, interval)| {
                Ok(HistoricalRow {
                    funding_time: parse_timestamp(&time)?,
                    funding_rate: from_storage_text(&rate)?,
                    mark_price: from_storage_text_opt(mark)?,
                    funding_interval_hours: interval,
                })
            })
            .collect()
    }

    /// Every `(exchange, symbol)` contract currently trading under
    /// `base_asset`, for the per-asset historical join.
    pub fn contracts_for_asset(&self, base_asset: &str) -> Result<Vec<(String, String, i32)>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT exchange, symbol, funding_interval_hours FROM contracts_live \
                 WHERE base_asset = ?1 ORDER BY exchange",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        stmt.query_map(params![base_asset], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map_err(|e| ObservatoryError::Storage(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ObservatoryError::Storage(e.to_string()))
    }

    /// The set of `funding_time`s already stored for a contract, used by
    /// the backfill runner to compute its gap plan.
    pub fn existing_funding_times(&self, exchange: &str, symbol: &str) -> Result<HashSet<DateTime<Utc>>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT funding_time FROM funding_history WHERE exchange = ?1 AND symbol = ?2")
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        let raw = stmt
            .query_map(params![exchange, symbol], |row| row.get::<_, String>(0))
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        raw.into_iter().map(|s| parse_timestamp(&s)).collect()
    }

    /// Funding rates over the trailing `window`, oldest first, for the
    /// statistics engine's rolling computation.
    pub fn rates_in_window(&self, exchange: &str, symbol: &str, since: DateTime<Utc>) -> Result<Vec<Decimal>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT funding_rate FROM funding_history WHERE exchange = ?1 AND symbol = ?2 \
                 AND funding_time >= ?3 ORDER BY funding_time ASC",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        let raw = stmt
            .query_map(params![exchange, symbol, since.to_rfc3339()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        raw.iter().map(|s| from_storage_text(s)).collect()
    }

    /// Every distinct `(exchange, symbol)` pair with at least one
    /// historical point, the statistics engine's iteration domain.
    pub fn distinct_historical_contracts(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT DISTINCT exchange, symbol FROM funding_history")
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))
    }

    /// Overwrite (not append) a contract's statistics row.
    pub fn upsert_contract_stats(&self, stats: &crate::models::ContractStats) -> Result<()> {
        let conn = self.conn();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO contract_stats (
                exchange, symbol, mean, std_dev, median, min, max, data_points,
                current_z_score, current_percentile, last_updated
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(exchange, symbol) DO UPDATE SET
                mean = excluded.mean, std_dev = excluded.std_dev, median = excluded.median,
                min = excluded.min, max = excluded.max, data_points = excluded.data_points,
                current_z_score = excluded.current_z_score,
                current_percentile = excluded.current_percentile,
                last_updated = excluded.last_updated",
            params![
                stats.exchange,
                stats.symbol,
                to_storage_text(stats.mean),
                to_storage_text(stats.std_dev),
                to_storage_text(stats.median),
                to_storage_text(stats.min),
                to_storage_text(stats.max),
                stats.data_points,
                stats.current_z_score,
                stats.current_percentile,
                stats.last_updated.to_rfc3339(),
            ],
        )
        .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn contract_stats(&self, exchange: &str, symbol: &str) -> Result<Option<ContractStatsRow>> {
        let conn = self.conn();
        let conn = conn.lock();
        conn.query_row(
            "SELECT exchange, symbol, mean, std_dev, median, min, max, data_points, \
             current_z_score, current_percentile, last_updated \
             FROM contract_stats WHERE exchange = ?1 AND symbol = ?2",
            params![exchange, symbol],
            row_to_stats,
        )
        .optional_storage()
    }

    /// All statistics rows, for the `/api/contracts-with-zscores` join.
    pub fn all_contract_stats(&self) -> Result<Vec<ContractStatsRow>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT exchange, symbol, mean, std_dev, median, min, max, data_points, \
                 current_z_score, current_percentile, last_updated FROM contract_stats",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?, row.get::<_, String>(4)?, row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?, row.get::<_, u32>(7)?, row.get::<_, Option<f64>>(8)?,
                    row.get::<_, Option<f64>>(9)?, row.get::<_, String>(10)?,
                ))
            })
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(exchange, symbol, mean, std_dev, median, min, max, data_points, z, pct, updated)| {
                Ok(ContractStatsRow {
                    exchange,
                    symbol,
                    mean: from_storage_text(&mean)?,
                    std_dev: from_storage_text(&std_dev)?,
                    median: from_storage_text(&median)?,
                    min: from_storage_text(&min)?,
                    max: from_storage_text(&max)?,
                    data_points,
                    current_z_score: z,
                    current_percentile: pct,
                    last_updated: parse_timestamp(&updated)?,
                })
            })
            .collect()
    }

    /// Arbitrage opportunities, newest-observed-first, filtered to
    /// `apr_spread >= min_apr_spread`, paginated.
    pub fn spreads(&self, min_apr_spread: f64, limit: usize, offset: usize) -> Result<Vec<SpreadRow>> {
        let conn = self.conn();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT asset, long_exchange, long_symbol, long_rate, long_interval_hours, \
                 short_exchange, short_symbol, short_rate, short_interval_hours, rate_spread, \
                 apr_spread, sync_period_hours, long_sync_funding, short_sync_funding, \
                 effective_hourly_spread, daily_spread, weekly_spread, monthly_spread, \
                 yearly_spread, observed_at \
                 FROM spreads WHERE CAST(apr_spread AS REAL) >= ?1 \
                 ORDER BY observed_at DESC, CAST(apr_spread AS REAL) DESC LIMIT ?2 OFFSET ?3",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![min_apr_spread, limit as i64, offset as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?, row.get::<_, i32>(4)?, row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?, row.get::<_, String>(7)?, row.get::<_, i32>(8)?,
                    row.get::<_, String>(9)?, row.get::<_, String>(10)?, row.get::<_, i64>(11)?,
                    row.get::<_, String>(12)?, row.get::<_, String>(13)?, row.get::<_, String>(14)?,
                    row.get::<_, String>(15)?, row.get::<_, String>(16)?, row.get::<_, String>(17)?,
                    row.get::<_, String>(18)?, row.get::<_, String>(19)?,
                ))
            })
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(asset, le, ls, lr, li, se, ss, sr, si, rs, aprs, sync_h, lsf, ssf, ehs, ds, ws, ms, ys, obs)| {
                Ok(SpreadRow {
                    asset,
                    long_exchange: le,
                    long_symbol: ls,
                    long_rate: from_storage_text(&lr)?,
                    long_interval_hours: li,
                    short_exchange: se,
                    short_symbol: ss,
                    short_rate: from_storage_text(&sr)?,
                    short_interval_hours: si,
                    rate_spread: from_storage_text(&rs)?,
                    apr_spread: from_storage_text(&aprs)?,
                    sync_period_hours: sync_h,
                    long_sync_funding: from_storage_text(&lsf)?,
                    short_sync_funding: from_storage_text(&ssf)?,
                    effective_hourly_spread: from_storage_text(&ehs)?,
                    daily_spread: from_storage_text(&ds)?,
                    weekly_spread: from_storage_text(&ws)?,
                    monthly_spread: from_storage_text(&ms)?,
                    yearly_spread: from_storage_text(&ys)?,
                    observed_at: parse_timestamp(&obs)?,
                })
            })
            .collect()
    }

    /// Prune spread rows older than `max_age_days`.
    pub fn prune_old_spreads(&self, now: DateTime<Utc>, max_age_days: i64) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(max_age_days);
        let conn = self.conn();
        let conn = conn.lock();
        conn.execute(
            "DELETE FROM spreads WHERE observed_at < ?1",
            params![cutoff.to_rfc3339()],
        )
        .map_err(|e| ObservatoryError::Storage(e.to_string()))
    }
}

fn row_to_stats(row: &rusqlite::Row) -> rusqlite::Result<ContractStatsRow> {
    let exchange: String = row.get(0)?;
    let symbol: String = row.get(1)?;
    let mean: String = row.get(2)?;
    let std_dev: String = row.get(3)?;
    let median: String = row.get(4)?;
    let min: String = row.get(5)?;
    let max: String = row.get(6)?;
    let data_points: u32 = row.get(7)?;
    let z: Option<f64> = row.get(8)?;
    let pct: Option<f64> = row.get(9)?;
    let updated: String = row.get(10)?;

    Ok(ContractStatsRow {
        exchange,
        symbol,
        mean: from_storage_text(&mean).unwrap_or_default(),
        std_dev: from_storage_text(&std_dev).unwrap_or_default(),
        median: from_storage_text(&median).unwrap_or_default(),
        min: from_storage_text(&min).unwrap_or_default(),
        max: from_storage_text(&max).unwrap_or_default(),
        data_points,
        current_z_score: z,
        current_percentile: pct,
        last_updated: parse_timestamp(&updated).unwrap_or_else(|_| Utc::now()),
    })
}

/// Small helper converting rusqlite's `QueryReturnedNoRows` into `Ok(None)`
/// while leaving genuine errors intact, for single-row lookups that are
/// legitimately absent (cold start).
trait OptionalStorage<T> {
    fn optional_storage(self) -> Result<Option<T>>;
}

impl<T> OptionalStorage<T> for std::result::Result<T, rusqlite::Error> {
    fn optional_storage(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ObservatoryError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractStats, ContractType, MarketType, OpenInterestUnit};
    use rust_decimal_macros::dec;

    fn sample(exchange: &str, symbol: &str, base_asset: &str, rate: Decimal) -> crate::models::ContractSnapshot {
        crate::models::ContractSnapshot {
            exchange: exchange.into(),
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: "USDT".into(),
            funding_rate: rate,
            funding_interval_hours: 8,
            mark_price: Some(dec!(1.0)),
            index_price: Some(dec!(1.0)),
            open_interest: Some(dec!(1000)),
            open_interest_unit: OpenInterestUnit::BaseAsset,
            contract_type: ContractType::Linear,
            market_type: MarketType::UsdM,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn grid_aggregates_one_entry_per_asset_with_venue_columns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let now = Utc::now();
        storage
            .upsert_snapshots(
                &[
                    sample("binance", "1000BONKUSDT", "BONK", dec!(0.0001)),
                    sample("kucoin", "1000BONKUSDTM", "BONK", dec!(0.00009)),
                ],
                now,
            )
            .unwrap();

        let grid = storage.asset_grid().unwrap();
        let bonk = grid.get("BONK").expect("BONK entry present");
        assert_eq!(bonk.len(), 2);
        assert!((bonk["binance"].apr - dec!(10.95)).abs() < dec!(0.001));
        assert!((bonk["kucoin"].apr - dec!(9.855)).abs() < dec!(0.001));
    }

    #[test]
    fn contract_stats_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let stats = ContractStats {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            mean: dec!(0.0001),
            std_dev: dec!(0.00005),
            median: dec!(0.0001),
            min: dec!(0.00001),
            max: dec!(0.0002),
            data_points: 10,
            current_z_score: Some(1.5),
            current_percentile: Some(80.0),
            last_updated: Utc::now(),
        };
        storage.upsert_contract_stats(&stats).unwrap();
        let fetched = storage.contract_stats("binance", "BTCUSDT").unwrap().unwrap();
        assert_eq!(fetched.data_points, 10);
        assert_eq!(fetched.current_z_score, Some(1.5));
    }

    #[test]
    fn contract_stats_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        assert!(storage.contract_stats("binance", "NOPE").unwrap().is_none());
    }

    #[test]
    fn spreads_filtered_by_min_apr_spread() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let spread = crate::models::Spread {
            asset: "BTC".into(),
            long_exchange: "binance".into(),
            long_symbol: "BTCUSDT".into(),
            long_rate: dec!(-0.0002),
            long_interval_hours: 8,
            short_exchange: "bybit".into(),
            short_symbol: "BTCUSDT".into(),
            short_rate: dec!(0.0003),
            short_interval_hours: 4,
            rate_spread: dec!(0.0005),
            apr_spread: dec!(15.0),
            sync_period_hours: 8,
            long_sync_funding: dec!(-0.0002),
            short_sync_funding: dec!(0.0006),
            effective_hourly_spread: dec!(0.0001),
            daily_spread: dec!(0.0024),
            weekly_spread: dec!(0.0168),
            monthly_spread: dec!(0.072),
            yearly_spread: dec!(0.876),
            observed_at: Utc::now(),
        };
        storage.insert_spreads(&[spread]).unwrap();

        assert_eq!(storage.spreads(5.0, 10, 0).unwrap().len(), 1);
        assert_eq!(storage.spreads(20.0, 10, 0).unwrap().len(), 0);
    }
}
