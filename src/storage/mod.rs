//! Relational storage layer over `rusqlite` (WAL mode): a schema constant
//! applied once at open, a single connection guarded by a
//! `parking_lot::Mutex`, batched writes inside an explicit transaction.

pub mod queries;

use crate::decimal::{to_storage_text, to_storage_text_opt};
use crate::error::{ObservatoryError, Result};
use crate::models::{ContractSnapshot, FundingPoint, Spread};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

/// Live UPSERTs are batched at this size per round-trip.
pub const UPSERT_BATCH_SIZE: usize = 100;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS contracts_live (
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    base_asset TEXT NOT NULL,
    quote_asset TEXT NOT NULL,
    funding_rate TEXT NOT NULL,
    funding_interval_hours INTEGER NOT NULL,
    apr TEXT NOT NULL,
    mark_price TEXT,
    index_price TEXT,
    open_interest_usd TEXT,
    contract_type TEXT NOT NULL,
    market_type TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (exchange, symbol)
);

CREATE INDEX IF NOT EXISTS idx_contracts_live_base_asset ON contracts_live(base_asset);

CREATE TABLE IF NOT EXISTS funding_history (
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    funding_time TEXT NOT NULL,
    funding_rate TEXT NOT NULL,
    mark_price TEXT,
    funding_interval_hours INTEGER NOT NULL,
    PRIMARY KEY (exchange, symbol, funding_time)
);

CREATE INDEX IF NOT EXISTS idx_funding_history_lookup
    ON funding_history(exchange, symbol, funding_time DESC);

CREATE TABLE IF NOT EXISTS contract_stats (
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    mean TEXT NOT NULL,
    std_dev TEXT NOT NULL,
    median TEXT NOT NULL,
    min TEXT NOT NULL,
    max TEXT NOT NULL,
    data_points INTEGER NOT NULL,
    current_z_score REAL,
    current_percentile REAL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (exchange, symbol)
);

CREATE TABLE IF NOT EXISTS spreads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset TEXT NOT NULL,
    long_exchange TEXT NOT NULL,
    long_symbol TEXT NOT NULL,
    long_rate TEXT NOT NULL,
    long_interval_hours INTEGER NOT NULL,
    short_exchange TEXT NOT NULL,
    short_symbol TEXT NOT NULL,
    short_rate TEXT NOT NULL,
    short_interval_hours INTEGER NOT NULL,
    rate_spread TEXT NOT NULL,
    apr_spread TEXT NOT NULL,
    sync_period_hours INTEGER NOT NULL,
    long_sync_funding TEXT NOT NULL,
    short_sync_funding TEXT NOT NULL,
    effective_hourly_spread TEXT NOT NULL,
    daily_spread TEXT NOT NULL,
    weekly_spread TEXT NOT NULL,
    monthly_spread TEXT NOT NULL,
    yearly_spread TEXT NOT NULL,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spreads_asset_time ON spreads(asset, observed_at DESC);
"#;

pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(dsn: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(dsn, flags)
            .map_err(|e| ObservatoryError::Storage(format!("failed to open database at {dsn}: {e}")))?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ObservatoryError::Storage(format!("failed to initialize schema: {e}")))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(%journal_mode, "WAL mode not active");
        }

        let live_count: i64 = conn.query_row("SELECT COUNT(*) FROM contracts_live", [], |row| row.get(0)).unwrap_or(0);
        info!(dsn, live_count, "storage opened");

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// UPSERT a batch of live snapshots, chunked to [`UPSERT_BATCH_SIZE`]
    /// per round-trip. Open interest is normalized to USD here, using each
    /// snapshot's own mark price when the adapter reported base-asset units.
    pub fn upsert_snapshots(&self, batch: &[ContractSnapshot], now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.lock();
        let mut written = 0;

        for chunk in batch.chunks(UPSERT_BATCH_SIZE) {
            let tx = conn
                .transaction()
                .map_err(|e| ObservatoryError::Storage(format!("begin transaction: {e}")))?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO contracts_live (
                            exchange, symbol, base_asset, quote_asset, funding_rate,
                            funding_interval_hours, apr, mark_price, index_price,
                            open_interest_usd, contract_type, market_type, observed_at,
                            last_seen_at, is_active
                        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,1)
                        ON CONFLICT(exchange, symbol) DO UPDATE SET
                            base_asset = excluded.base_asset,
                            quote_asset = excluded.quote_asset,
                            funding_rate = excluded.funding_rate,
                            funding_interval_hours = excluded.funding_interval_hours,
                            apr = excluded.apr,
                            mark_price = excluded.mark_price,
                            index_price = excluded.index_price,
                            open_interest_usd = excluded.open_interest_usd,
                            contract_type = excluded.contract_type,
                            market_type = excluded.market_type,
                            observed_at = excluded.observed_at,
                            last_seen_at = excluded.last_seen_at,
                            is_active = 1",
                    )
                    .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

                for snapshot in chunk {
                    let open_interest_usd = normalize_open_interest_usd(snapshot);
                    stmt.execute(params![
                        snapshot.exchange,
                        snapshot.symbol,
                        snapshot.base_asset,
                        snapshot.quote_asset,
                        to_storage_text(snapshot.funding_rate),
                        snapshot.funding_interval_hours,
                        to_storage_text(snapshot.apr()),
                        to_storage_text_opt(snapshot.mark_price),
                        to_storage_text_opt(snapshot.index_price),
                        to_storage_text_opt(open_interest_usd),
                        contract_type_key(snapshot.contract_type),
                        market_type_key(snapshot.market_type),
                        snapshot.timestamp.to_rfc3339(),
                        now.to_rfc3339(),
                    ])
                    .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
                    written += 1;
                }
            }
            tx.commit().map_err(|e| ObservatoryError::Storage(format!("commit: {e}")))?;
        }

        Ok(written)
    }

    /// INSERT historical points with conflict-ignore on
    /// `(exchange, symbol, funding_time)`.
    pub fn insert_historical(&self, batch: &[FundingPoint]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let mut inserted = 0;

        for chunk in batch.chunks(UPSERT_BATCH_SIZE) {
            let tx = conn
                .transaction()
                .map_err(|e| ObservatoryError::Storage(format!("begin transaction: {e}")))?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT OR IGNORE INTO funding_history (
                            exchange, symbol, funding_time, funding_rate, mark_price, funding_interval_hours
                        ) VALUES (?1,?2,?3,?4,?5,?6)",
                    )
                    .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

                for point in chunk {
                    let changed = stmt
                        .execute(params![
                            point.exchange,
                            point.symbol,
                            point.funding_time.to_rfc3339(),
                            to_storage_text(point.funding_rate),
                            to_storage_text_opt(point.mark_price),
                            point.funding_interval_hours,
                        ])
                        .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
                    inserted += changed;
                }
            }
            tx.commit().map_err(|e| ObservatoryError::Storage(format!("commit: {e}")))?;
        }

        Ok(inserted)
    }

    pub fn insert_spreads(&self, batch: &[Spread]) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO spreads (
                    asset, long_exchange, long_symbol, long_rate, long_interval_hours,
                    short_exchange, short_symbol, short_rate, short_interval_hours,
                    rate_spread, apr_spread, sync_period_hours, long_sync_funding,
                    short_sync_funding, effective_hourly_spread, daily_spread,
                    weekly_spread, monthly_spread, yearly_spread, observed_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            )
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;

        let mut written = 0;
        for s in batch {
            stmt.execute(params![
                s.asset,
                s.long_exchange,
                s.long_symbol,
                to_storage_text(s.long_rate),
                s.long_interval_hours,
                s.short_exchange,
                s.short_symbol,
                to_storage_text(s.short_rate),
                s.short_interval_hours,
                to_storage_text(s.rate_spread),
                to_storage_text(s.apr_spread),
                s.sync_period_hours,
                to_storage_text(s.long_sync_funding),
                to_storage_text(s.short_sync_funding),
                to_storage_text(s.effective_hourly_spread),
                to_storage_text(s.daily_spread),
                to_storage_text(s.weekly_spread),
                to_storage_text(s.monthly_spread),
                to_storage_text(s.yearly_spread),
                s.observed_at.to_rfc3339(),
            ])
            .map_err(|e| ObservatoryError::Storage(e.to_string()))?;
            written += 1;
        }
        Ok(written)
    }

    /// Stale-contract policy: a live row not refreshed for `stale_after_secs` is
    /// marked `is_active = 0` rather than deleted, so historical joins and
    /// backfill status keep working against it.
    pub fn mark_stale_contracts(&self, now: DateTime<Utc>, stale_after_secs: i64) -> Result<usize> {
        let cutoff = now - chrono::Duration::seconds(stale_after_secs);
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE contracts_live SET is_active = 0 WHERE is_active = 1 AND last_seen_at < ?1",
            params![cutoff.to_rfc3339()],
        )
        .map_err(|e| ObservatoryError::Storage(e.to_string()))
    }

    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

fn normalize_open_interest_usd(snapshot: &ContractSnapshot) -> Option<rust_decimal::Decimal> {
    use crate::models::OpenInterestUnit;
    let oi = snapshot.open_interest?;
    match snapshot.open_interest_unit {
        OpenInterestUnit::Usd => Some(oi),
        OpenInterestUnit::BaseAsset => {
            let price = snapshot.mark_price.or(snapshot.index_price)?;
            Some(oi * price)
        }
    }
}

fn contract_type_key(ct: crate::models::ContractType) -> &'static str {
    match ct {
        crate::models::ContractType::Linear => "linear",
        crate::models::ContractType::Inverse => "inverse",
    }
}

fn market_type_key(mt: crate::models::MarketType) -> &'static str {
    match mt {
        crate::models::MarketType::UsdM => "usd_m",
        crate::models::MarketType::CoinM => "coin_m",
        crate::models::MarketType::Perp => "perp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractType, MarketType, OpenInterestUnit};
    use rust_decimal_macros::dec;

    fn sample_snapshot() -> ContractSnapshot {
        ContractSnapshot {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            funding_rate: dec!(0.0001),
            funding_interval_hours: 8,
            mark_price: Some(dec!(60000)),
            index_price: Some(dec!(60001)),
            open_interest: Some(dec!(10)),
            open_interest_unit: OpenInterestUnit::BaseAsset,
            contract_type: ContractType::Linear,
            market_type: MarketType::UsdM,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn upsert_is_idempotent_on_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let now = Utc::now();
        let snapshot = sample_snapshot();

        storage.upsert_snapshots(&[snapshot.clone()], now).unwrap();
        storage.upsert_snapshots(&[snapshot], now).unwrap();

        let count: i64 = storage
            .conn()
            .lock()
            .query_row("SELECT COUNT(*) FROM contracts_live", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn historical_insert_ignores_duplicate_funding_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let point = FundingPoint {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            funding_time: Utc::now(),
            funding_rate: dec!(0.0001),
            mark_price: None,
            funding_interval_hours: 8,
        };

        let first = storage.insert_historical(&[point.clone()]).unwrap();
        let second = storage.insert_historical(&[point]).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[test]
    fn open_interest_normalized_to_usd_using_mark_price() {
        let snapshot = sample_snapshot();
        let usd = normalize_open_interest_usd(&snapshot).unwrap();
        assert_eq!(usd, dec!(600000));
    }

    #[test]
    fn stale_contract_marked_inactive_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let old_now = Utc::now() - chrono::Duration::seconds(3600);
        storage.upsert_snapshots(&[sample_snapshot()], old_now).unwrap();

        let marked = storage.mark_stale_contracts(Utc::now(), 300).unwrap();
        assert_eq!(marked, 1);
    }
}
