//! Bitget futures adapter: CEX REST, bulk with per-symbol fallback.
//!
//! `/api/v2/mix/market/tickers` is called once per product type (`usdt
//! futures`, `coin futures`) and returns funding rate, mark price, index
//! price and open interest for every symbol in that product type.

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

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPES: &[(&str, ContractType)] = &[("usdt-futures", ContractType::Linear), ("coin-futures", ContractType::Inverse)];

pub struct BitgetAdapter {
    http: RateLimitedClient,
}

impl BitgetAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct BitgetEnvelope<T> {
    code: String,
    msg: String,
    data: T,
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
    #[serde(rename = "holdingAmount")]
    holding_amount: String,
}

#[derive(Debug, Deserialize)]
struct ContractConfigEntry {
    symbol: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "symbolStatus")]
    symbol_status: String,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: String,
}

#[async_trait]
impl Exchange for BitgetAdapter {
    fn name(&self) -> &'static str {
        "bitget"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();
        let now = Utc::now();

        for &(product_type, contract_type) in PRODUCT_TYPES {
            let resp: Result<BitgetEnvelope<Vec<TickerEntry>>> = self
                .http
                .get_json(
                    &format!("{BASE_URL}/api/v2/mix/market/tickers"),
                    &[("productType", product_type.to_string())],
                    cancel,
                )
                .await;

            let tickers = match resp {
                Ok(env) if env.code == "00000" => {
                    report.success(format!("GET /api/v2/mix/market/tickers?productType={product_type}"));
                    env.data
                }
                Ok(env) => {
                    report.failure(
                        format!("GET /api/v2/mix/market/tickers?productType={product_type}"),
                        false,
                        env.msg,
                    );
                    continue;
                }
                Err(e) => {
                    report.failure(
                        format!("GET /api/v2/mix/market/tickers?productType={product_type}"),
                        e.is_retryable(),
                        e.to_string(),
                    );
                    continue;
                }
            };

            for t in tickers {
                let Ok(rate) = Decimal::from_str(&t.funding_rate) else { continue };
                let base_raw = t.symbol.strip_suffix("USDT").or_else(|| t.symbol.strip_suffix("USD")).unwrap_or(&t.symbol);

                snapshots.push(ContractSnapshot {
                    exchange: self.name().to_string(),
                    symbol: t.symbol.clone(),
                    base_asset: normalize_base_asset(base_raw),
                    quote_asset: if t.symbol.ends_with("USDT") { "USDT".into() } else { "USD".into() },
                    funding_rate: rate,
                    funding_interval_hours: 8,
                    mark_price: Decimal::from_str(&t.mark_price).ok(),
                    index_price: Decimal::from_str(&t.index_price).ok(),
                    open_interest: Decimal::from_str(&t.holding_amount).ok(),
                    open_interest_unit: OpenInterestUnit::BaseAsset,
                    contract_type,
                    market_type: MarketType::Perp,
                    timestamp: now,
                });
            }
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
        let resp: BitgetEnvelope<Vec<FundingHistoryEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v2/mix/market/history-fund-rate"),
                &[("symbol", symbol.to_string()), ("productType", "usdt-futures".to_string()), ("pageSize", "100".to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|e| {
                let ts = e.funding_time.parse::<i64>().ok()?;
                if ts < start.timestamp_millis() || ts > end.timestamp_millis() {
                    return None;
                }
                Some(FundingPoint {
                    exchange: "bitget".to_string(),
                    symbol: e.symbol,
                    funding_time: Utc.timestamp_millis_opt(ts).single()?,
                    funding_rate: Decimal::from_str(&e.funding_rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let mut all = Vec::new();
        for &(product_type, _) in PRODUCT_TYPES {
            let resp: BitgetEnvelope<Vec<ContractConfigEntry>> = self
                .http
                .get_json(&format!("{BASE_URL}/api/v2/mix/market/contracts"), &[("productType", product_type.to_string())], cancel)
                .await?;
            all.extend(resp.data.into_iter().filter(|c| c.symbol_status == "normal").map(|c| ContractMeta {
                base_asset: normalize_base_asset(&c.base_coin),
                quote_asset: c.quote_coin,
                symbol: c.symbol,
                funding_interval_hours: 8,
            }));
        }
        Ok(all)
    }
}
