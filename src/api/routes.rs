//! Handlers for the stable HTTP contract.
//!
//! Each handler is an `async fn` taking `State`/`Query`/`Path` extractors
//! and returning `Result<Json<T>, ApiError>`, so every failure carries a
//! `{error:{kind,message,detail?}}` envelope instead of an empty body.

use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::cache::{cache_key, EndpointClass};
use crate::models::compute_apr;
use crate::storage::queries::{GridCell, HistoricalRow, LiveRow, SpreadRow};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct AssetGridEntry {
    pub exchanges: BTreeMap<String, GridCell>,
}

/// `GET /api/funding-rates-grid`. Cached 5s.
pub async fn funding_rates_grid(State(state): State<AppState>) -> ApiResult<Json<BTreeMap<String, AssetGridEntry>>> {
    let key = cache_key("/api/funding-rates-grid", &[]);
    let ttl = state.config.cache_ttl(EndpointClass::AssetGrid.config_key(), EndpointClass::AssetGrid.default_ttl().as_secs());
    let storage = state.storage.clone();

    let grid: BTreeMap<String, BTreeMap<String, GridCell>> = state
        .cache
        .get_or_fetch(key, ttl, || async move { Ok(storage.asset_grid()?) })
        .await?;

    Ok(Json(
        grid.into_iter().map(|(asset, exchanges)| (asset, AssetGridEntry { exchanges })).collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct FundingRatesQuery {
    pub base_asset: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/funding-rates?base_asset=&limit=`.
pub async fn funding_rates(
    State(state): State<AppState>,
    Query(q): Query<FundingRatesQuery>,
) -> ApiResult<Json<Vec<LiveRow>>> {
    let key = cache_key(
        "/api/funding-rates",
        &[
            ("base_asset", q.base_asset.as_deref().unwrap_or("")),
            ("limit", &q.limit.map(|l| l.to_string()).unwrap_or_default()),
        ],
    );
    let ttl = state.config.cache_ttl(EndpointClass::AssetGrid.config_key(), EndpointClass::AssetGrid.default_ttl().as_secs());
    let storage = state.storage.clone();
    let base_asset = q.base_asset.clone();
    let limit = q.limit;

    let rows: Vec<LiveRow> = state
        .cache
        .get_or_fetch(key, ttl, || async move { Ok(storage.latest_snapshots(base_asset.as_deref(), limit)?) })
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RateAprPair {
    pub rate: Decimal,
    pub apr: Decimal,
}

#[derive(Debug, Serialize)]
pub struct HistoricalByAssetPoint {
    pub timestamp: DateTime<Utc>,
    pub contracts: BTreeMap<String, RateAprPair>,
}

#[derive(Debug, Serialize)]
pub struct HistoricalByAssetResponse {
    pub asset: String,
    pub contracts: Vec<String>,
    pub data: Vec<HistoricalByAssetPoint>,
}

/// `GET /api/historical-funding-by-asset/{asset}?days=`:
/// timestamps are aligned across contracts by bucketing to the shortest
/// common funding interval among the asset's contracts.
pub async fn historical_by_asset(
    State(state): State<AppState>,
    Path(asset): Path<String>,
    Query(q): Query<DaysQuery>,
) -> ApiResult<Json<HistoricalByAssetResponse>> {
    let days = q.days.unwrap_or(30).max(1);
    let key = cache_key("/api/historical-funding-by-asset", &[("asset", &asset), ("days", &days.to_string())]);
    let ttl = state.config.cache_ttl(EndpointClass::Historical.config_key(), EndpointClass::Historical.default_ttl().as_secs());

    let storage = state.storage.clone();
    let asset_for_fetch = asset.clone();
    let response = state
        .cache
        .get_or_fetch(key, ttl, || async move { build_historical_by_asset(&storage, &asset_for_fetch, days) })
        .await?;
    Ok(Json(response))
}

fn build_historical_by_asset(storage: &crate::storage::Storage, asset: &str, days: i64) -> anyhow::Result<HistoricalByAssetResponse> {
    let since = Utc::now() - ChronoDuration::days(days);
    let contracts = storage.contracts_for_asset(asset)?;
    if contracts.is_empty() {
        return Ok(HistoricalByAssetResponse {
            asset: asset.to_string(),
            contracts: Vec::new(),
            data: Vec::new(),
        });
    }

    let shortest_interval_hours = contracts.iter().map(|(_, _, interval)| *interval).min().unwrap_or(8).max(1);
    let bucket_secs = shortest_interval_hours as i64 * 3600;

    let mut contract_keys = Vec::with_capacity(contracts.len());
    let mut per_contract_rows: Vec<(String, Vec<HistoricalRow>)> = Vec::with_capacity(contracts.len());
    for (exchange, symbol, _interval) in &contracts {
        let key = format!("{exchange}:{symbol}");
        let rows = storage.historical_by_contract(exchange, symbol, since, None)?;
        contract_keys.push(key.clone());
        per_contract_rows.push((key, rows));
    }

    let mut buckets: BTreeMap<i64, BTreeMap<String, RateAprPair>> = BTreeMap::new();
    for (key, rows) in &per_contract_rows {
        for row in rows {
            let bucket = row.funding_time.timestamp().div_euclid(bucket_secs);
            buckets.entry(bucket).or_default().insert(
                key.clone(),
                RateAprPair {
                    rate: row.funding_rate,
                    apr: compute_apr(row.funding_rate, row.funding_interval_hours),
                },
            );
        }
    }

    let data = buckets
        .into_iter()
        .map(|(bucket, contracts)| HistoricalByAssetPoint {
            timestamp: Utc.timestamp_opt(bucket * bucket_secs, 0).single().unwrap_or_else(Utc::now),
            contracts,
        })
        .collect();

    Ok(HistoricalByAssetResponse {
        asset: asset.to_string(),
        contracts: contract_keys,
        data,
    })
}

/// `GET /api/historical-funding-by-contract/{exchange}/{symbol}?days=`,
/// newest first.
pub async fn historical_by_contract(
    State(state): State<AppState>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(q): Query<DaysQuery>,
) -> ApiResult<Json<Vec<HistoricalRow>>> {
    let days = q.days.unwrap_or(30).max(1);
    let since = Utc::now() - ChronoDuration::days(days);
    let key = cache_key(
        "/api/historical-funding-by-contract",
        &[("exchange", &exchange), ("symbol", &symbol), ("days", &days.to_string())],
    );
    let ttl = state.config.cache_ttl(EndpointClass::Historical.config_key(), EndpointClass::Historical.default_ttl().as_secs());
    let storage = state.storage.clone();
    let (exchange_for_fetch, symbol_for_fetch) = (exchange.clone(), symbol.clone());

    let rows: Vec<HistoricalRow> = state
        .cache
        .get_or_fetch(key, ttl, || async move {
            Ok(storage.historical_by_contract(&exchange_for_fetch, &symbol_for_fetch, since, None)?)
        })
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct ContractWithZScore {
    #[serde(flatten)]
    pub live: LiveRow,
    pub mean: Option<Decimal>,
    pub std_dev: Option<Decimal>,
    pub current_z_score: Option<f64>,
    pub current_percentile: Option<f64>,
}

/// `GET /api/contracts-with-zscores`: live snapshots joined with the
/// statistics engine's latest rolling computation.
pub async fn contracts_with_zscores(State(state): State<AppState>) -> ApiResult<Json<Vec<ContractWithZScore>>> {
    let key = cache_key("/api/contracts-with-zscores", &[]);
    let ttl = state.config.cache_ttl(EndpointClass::Statistics.config_key(), EndpointClass::Statistics.default_ttl().as_secs());
    let storage = state.storage.clone();

    let joined: Vec<ContractWithZScore> = state
        .cache
        .get_or_fetch(key, ttl, || async move {
            let live = storage.latest_snapshots(None, None)?;
            let stats = storage.all_contract_stats()?;
            let mut by_key = BTreeMap::new();
            for s in stats {
                by_key.insert((s.exchange.clone(), s.symbol.clone()), s);
            }
            let joined = live
                .into_iter()
                .map(|row| {
                    let stats = by_key.get(&(row.exchange.clone(), row.symbol.clone()));
                    ContractWithZScore {
                        mean: stats.map(|s| s.mean),
                        std_dev: stats.map(|s| s.std_dev),
                        current_z_score: stats.and_then(|s| s.current_z_score),
                        current_percentile: stats.and_then(|s| s.current_percentile),
                        live: row,
                    }
                })
                .collect();
            Ok(joined)
        })
        .await?;
    Ok(Json(joined))
}

#[derive(Debug, Deserialize)]
pub struct ArbitrageQuery {
    pub min_apr_spread: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// `GET /api/arbitrage/opportunities`, filtered/ranked/paginated.
pub async fn arbitrage_opportunities(
    State(state): State<AppState>,
    Query(q): Query<ArbitrageQuery>,
) -> ApiResult<Json<Vec<SpreadRow>>> {
    let min_apr_spread = q.min_apr_spread.unwrap_or(state.config.arbitrage.min_apr_spread);
    let limit = q.limit.unwrap_or(100);
    let offset = q.offset.unwrap_or(0);

    let key = cache_key(
        "/api/arbitrage/opportunities",
        &[
            ("min_apr_spread", &min_apr_spread.to_string()),
            ("limit", &limit.to_string()),
            ("offset", &offset.to_string()),
        ],
    );
    let ttl = state.config.cache_ttl(EndpointClass::Arbitrage.config_key(), EndpointClass::Arbitrage.default_ttl().as_secs());
    let storage = state.storage.clone();

    let rows: Vec<SpreadRow> = state
        .cache
        .get_or_fetch(key, ttl, || async move { Ok(storage.spreads(min_apr_spread, limit, offset)?) })
        .await?;
    Ok(Json(rows))
}

/// `GET /api/backfill-status`: self-heals a stale `in_progress` document on
/// read.
pub async fn backfill_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    match state.backfill_status()? {
        Some(status) => Ok(Json(serde_json::to_value(status).map_err(anyhow::Error::from)?)),
        None => Ok(Json(serde_json::json!({ "state": "never_run" }))),
    }
}

/// `POST /api/cache/clear`.
pub async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.cache.clear();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage_ok: bool,
    pub cache_healthy: bool,
}

/// `GET /api/health`: liveness plus a cheap storage dependency probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage_ok = state.storage.conn().lock().query_row("SELECT 1", [], |_| Ok(())).is_ok();
    Json(HealthResponse {
        status: if storage_ok { "ok" } else { "degraded" },
        storage_ok,
        cache_healthy: state.cache.is_healthy(),
    })
}

#[derive(Debug, Serialize)]
pub struct PerformanceResponse {
    pub counters: crate::metrics::CounterSnapshot,
    pub last_cycle: Option<crate::metrics::LastCycleSnapshot>,
}

/// `GET /api/health/performance`: last cycle metrics.
pub async fn health_performance(State(state): State<AppState>) -> Json<PerformanceResponse> {
    Json(PerformanceResponse {
        counters: state.metrics.counters(&state.cache, &state.registry),
        last_cycle: state.metrics.last_cycle(),
    })
}
