//! MEXC contract adapter: CEX REST, bulk with per-symbol fallback.
//!
//! `/api/v1/contract/ticker` (no symbol) returns funding rate, mark/index
//! price and open interest for every contract in one call.

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

const BASE_URL: &str = "https://contract.mexc.com";

pub struct MexcAdapter {
    http: RateLimitedClient,
}

impl MexcAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct MexcEnvelope<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    #[serde(rename = "fairPrice")]
    fair_price: f64,
    #[serde(rename = "indexPrice")]
    index_price: f64,
    #[serde(rename = "holdVol")]
    hold_vol: f64,
}

#[derive(Debug, Deserialize)]
struct ContractDetailEntry {
    symbol: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "contractType")]
    contract_type: String,
    state: i32,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    #[serde(rename = "settleTime")]
    settle_time: i64,
}

#[async_trait]
impl Exchange for MexcAdapter {
    fn name(&self) -> &'static str {
        "mexc"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<MexcEnvelope<Vec<TickerEntry>>> =
            self.http.get_json(&format!("{BASE_URL}/api/v1/contract/ticker"), &[], cancel).await;

        let tickers = match resp {
            Ok(env) if env.success => {
                report.success("GET /api/v1/contract/ticker");
                env.data
            }
            Ok(_) => {
                report.failure("GET /api/v1/contract/ticker", false, "success=false".to_string());
                return (snapshots, report);
            }
            Err(e) => {
                report.failure("GET /api/v1/contract/ticker", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for t in tickers {
            let Ok(rate) = Decimal::try_from(t.funding_rate) else { continue };
            let base_raw = t.symbol.split('_').next().unwrap_or(&t.symbol);
            let quote = t.symbol.split('_').nth(1).unwrap_or("USDT").to_string();

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: t.symbol.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: quote,
                funding_rate: rate,
                funding_interval_hours: 8,
                mark_price: Decimal::try_from(t.fair_price).ok(),
                index_price: Decimal::try_from(t.index_price).ok(),
                open_interest: Decimal::try_from(t.hold_vol).ok(),
                open_interest_unit: OpenInterestUnit::BaseAsset,
                contract_type: ContractType::Linear,
                market_type: MarketType::Perp,
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
        let resp: MexcEnvelope<Vec<FundingHistoryEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v1/contract/funding_rate/history"),
                &[("symbol", symbol.to_string()), ("page_size", "1000".to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|e| {
                let secs = e.settle_time / 1000;
                secs >= start.timestamp() && secs <= end.timestamp()
            })
            .filter_map(|e| {
                Some(FundingPoint {
                    exchange: "mexc".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: Utc.timestamp_millis_opt(e.settle_time).single()?,
                    funding_rate: Decimal::try_from(e.funding_rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: MexcEnvelope<Vec<ContractDetailEntry>> =
            self.http.get_json(&format!("{BASE_URL}/api/v1/contract/detail"), &[], cancel).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.state == 0)
            .map(|c| ContractMeta {
                base_asset: normalize_base_asset(&c.base_coin),
                quote_asset: c.quote_coin,
                symbol: c.symbol,
                funding_interval_hours: 8,
            })
            .collect())
    }
}
