//! Bybit derivatives adapter: CEX REST, paginated.
//!
//! Live snapshots come from `/v5/market/tickers?category=linear`, one bulk
//! call covering funding rate, mark/index price and open interest for every
//! linear symbol. Historical funding is per-symbol via
//! `/v5/market/funding/history`, paginated backwards from `end` using the
//! returned cursor.

use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::exchanges::{AdapterReport, Exchange};
use crate::http::RateLimitedClient;
use crate::models::{ContractMeta, ContractSnapshot, ContractType, FundingPoint, MarketType, OpenInterestUnit};
use crate::normalize::normalize_base_asset;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

const BASE_URL: &str = "https://api.bybit.com";

pub struct BybitAdapter {
    http: RateLimitedClient,
}

impl BybitAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: T,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "indexPrice")]
    index_price: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryResult {
    list: Vec<FundingHistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingRateTimestamp")]
    funding_rate_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<InstrumentEntry>,
}

#[derive(Debug, Deserialize)]
struct InstrumentEntry {
    symbol: String,
    status: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "fundingInterval")]
    funding_interval_minutes: i32,
}

#[async_trait]
impl Exchange for BybitAdapter {
    fn name(&self) -> &'static str {
        "bybit"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<BybitEnvelope<TickersResult>> = self
            .http
            .get_json(&format!("{BASE_URL}/v5/market/tickers"), &[("category", "linear".to_string())], cancel)
            .await;

        let entries = match resp {
            Ok(envelope) if envelope.ret_code == 0 => {
                report.success("GET /v5/market/tickers");
                envelope.result.list
            }
            Ok(envelope) => {
                report.failure("GET /v5/market/tickers", false, envelope.ret_msg);
                return (snapshots, report);
            }
            Err(e) => {
                report.failure("GET /v5/market/tickers", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for entry in entries {
            let Some(base_raw) = entry.symbol.strip_suffix("USDT").or_else(|| entry.symbol.strip_suffix("USD")) else {
                continue;
            };
            let (Ok(rate), Ok(mark)) = (Decimal::from_str(&entry.funding_rate), Decimal::from_str(&entry.mark_price))
            else {
                report.failure("parse tickers", false, format!("bad decimal for {}", entry.symbol));
                continue;
            };

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: entry.symbol.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: if entry.symbol.ends_with("USDT") { "USDT".into() } else { "USD".into() },
                funding_rate: rate,
                funding_interval_hours: 8,
                mark_price: Some(mark),
                index_price: Decimal::from_str(&entry.index_price).ok(),
                open_interest: Decimal::from_str(&entry.open_interest).ok(),
                open_interest_unit: OpenInterestUnit::BaseAsset,
                contract_type: ContractType::Linear,
                market_type: MarketType::UsdM,
                timestamp: now,
            });
        }

        (snapshots, report)
    }

    async fn fetch_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FundingPoint>> {
        let mut points = Vec::new();
        let mut cursor_end = end.timestamp_millis();
        let start_ms = start.timestamp_millis();

        loop {
            let resp: BybitEnvelope<FundingHistoryResult> = self
                .http
                .get_json(
                    &format!("{BASE_URL}/v5/market/funding/history"),
                    &[
                        ("category", "linear".to_string()),
                        ("symbol", symbol.to_string()),
                        ("startTime", start_ms.to_string()),
                        ("endTime", cursor_end.to_string()),
                        ("limit", "200".to_string()),
                    ],
                    cancel,
                )
                .await?;

            if resp.ret_code != 0 || resp.result.list.is_empty() {
                break;
            }

            let oldest = resp
                .result
                .list
                .iter()
                .filter_map(|e| e.funding_rate_timestamp.parse::<i64>().ok())
                .min()
                .unwrap_or(cursor_end);

            for e in &resp.result.list {
                let (Ok(rate), Ok(ts)) =
                    (Decimal::from_str(&e.funding_rate), e.funding_rate_timestamp.parse::<i64>())
                else {
                    continue;
                };
                points.push(FundingPoint {
                    exchange: self.name().to_string(),
                    symbol: e.symbol.clone(),
                    funding_time: Utc.timestamp_millis_opt(ts).single().unwrap_or(end),
                    funding_rate: rate,
                    mark_price: None,
                    funding_interval_hours: 8,
                });
            }

            if resp.result.list.len() < 200 || oldest <= start_ms {
                break;
            }
            cursor_end = oldest - 1;
        }

        Ok(points)
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: BybitEnvelope<InstrumentsResult> = self
            .http
            .get_json(
                &format!("{BASE_URL}/v5/market/instruments-info"),
                &[("category", "linear".to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .result
            .list
            .into_iter()
            .filter(|i| i.status == "Trading")
            .map(|i| {
                let interval_hours = (i.funding_interval_minutes / 60).max(1);
                ContractMeta {
                    base_asset: normalize_base_asset(i.symbol.strip_suffix(&i.quote_coin).unwrap_or(&i.symbol)),
                    quote_asset: i.quote_coin,
                    symbol: i.symbol,
                    funding_interval_hours: interval_hours,
                }
            })
            .collect())
    }
}
