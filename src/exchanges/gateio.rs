//! Gate.io futures adapter: CEX REST, bulk with per-symbol fallback.
//!
//! `/api/v4/futures/{settle}/contracts` is called once per settle currency
//! (`usdt`, `btc`) and returns funding rate, mark price, index price and
//! open interest for every listed contract in that settle currency.

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

const BASE_URL: &str = "https://api.gateio.ws";
const SETTLE_CURRENCIES: &[&str] = &["usdt", "btc"];

pub struct GateioAdapter {
    http: RateLimitedClient,
}

impl GateioAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    name: String,
    #[serde(rename = "funding_rate")]
    funding_rate: String,
    #[serde(rename = "funding_interval")]
    funding_interval_secs: i64,
    #[serde(rename = "mark_price")]
    mark_price: String,
    #[serde(rename = "index_price")]
    index_price: String,
    in_delisting: bool,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    contract: String,
    #[serde(rename = "total_size")]
    total_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundingRateHistoryEntry {
    r: String,
    t: i64,
}

#[async_trait]
impl Exchange for GateioAdapter {
    fn name(&self) -> &'static str {
        "gateio"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();
        let now = Utc::now();

        for &settle in SETTLE_CURRENCIES {
            let resp: Result<Vec<ContractEntry>> = self
                .http
                .get_json(&format!("{BASE_URL}/api/v4/futures/{settle}/contracts"), &[], cancel)
                .await;

            let contracts = match resp {
                Ok(c) => {
                    report.success(format!("GET /api/v4/futures/{settle}/contracts"));
                    c
                }
                Err(e) => {
                    report.failure(format!("GET /api/v4/futures/{settle}/contracts"), e.is_retryable(), e.to_string());
                    continue;
                }
            };

            let tickers: Vec<TickerEntry> = self
                .http
                .get_json(&format!("{BASE_URL}/api/v4/futures/{settle}/tickers"), &[], cancel)
                .await
                .unwrap_or_default();
            let oi_by_contract: std::collections::HashMap<String, Decimal> = tickers
                .into_iter()
                .filter_map(|t| Decimal::from_str(&t.total_size?).ok().map(|d| (t.contract, d)))
                .collect();

            for contract in contracts {
                if contract.in_delisting {
                    continue;
                }
                let Ok(rate) = Decimal::from_str(&contract.funding_rate) else { continue };
                let base_raw = contract.name.split('_').next().unwrap_or(&contract.name);
                let quote = contract.name.split('_').nth(1).unwrap_or(settle).to_ascii_uppercase();

                snapshots.push(ContractSnapshot {
                    exchange: self.name().to_string(),
                    symbol: contract.name.clone(),
                    base_asset: normalize_base_asset(base_raw),
                    quote_asset: quote,
                    funding_rate: rate,
                    funding_interval_hours: ((contract.funding_interval_secs / 3600).max(1)) as i32,
                    mark_price: Decimal::from_str(&contract.mark_price).ok(),
                    index_price: Decimal::from_str(&contract.index_price).ok(),
                    open_interest: oi_by_contract.get(&contract.name).copied(),
                    open_interest_unit: OpenInterestUnit::BaseAsset,
                    contract_type: if settle == "usdt" { ContractType::Linear } else { ContractType::Inverse },
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
        let settle = if symbol.ends_with("_USDT") { "usdt" } else { "btc" };
        let entries: Vec<FundingRateHistoryEntry> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v4/futures/{settle}/funding_rate"),
                &[("contract", symbol.to_string()), ("limit", "1000".to_string())],
                cancel,
            )
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.t >= start.timestamp() && e.t <= end.timestamp())
            .filter_map(|e| {
                Some(FundingPoint {
                    exchange: "gateio".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: Utc.timestamp_opt(e.t, 0).single()?,
                    funding_rate: Decimal::from_str(&e.r).ok()?,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let mut all = Vec::new();
        for &settle in SETTLE_CURRENCIES {
            let contracts: Vec<ContractEntry> = self
                .http
                .get_json(&format!("{BASE_URL}/api/v4/futures/{settle}/contracts"), &[], cancel)
                .await?;
            for c in contracts.into_iter().filter(|c| !c.in_delisting) {
                let base_raw = c.name.split('_').next().unwrap_or(&c.name).to_string();
                let quote = c.name.split('_').nth(1).unwrap_or(settle).to_ascii_uppercase();
                all.push(ContractMeta {
                    base_asset: normalize_base_asset(&base_raw),
                    quote_asset: quote,
                    symbol: c.name,
                    funding_interval_hours: ((c.funding_interval_secs / 3600).max(1)) as i32,
                });
            }
        }
        Ok(all)
    }
}
