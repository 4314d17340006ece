//! KuCoin futures adapter: CEX REST, bulk with per-symbol fallback.
//!
//! `/api/v1/contracts/active` returns funding rate, mark price and open
//! interest for every contract in one call. A handful of newly-listed
//! contracts occasionally omit `fundingFeeRate` from that payload; those
//! fall back to a per-symbol `/api/v1/funding-rate/{symbol}/current` call.

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

const BASE_URL: &str = "https://api-futures.kucoin.com";

pub struct KucoinAdapter {
    http: RateLimitedClient,
}

impl KucoinAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct KucoinEnvelope<T> {
    code: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    symbol: String,
    #[serde(rename = "quoteCurrency")]
    quote_currency: String,
    #[serde(rename = "baseCurrency")]
    base_currency: String,
    status: String,
    #[serde(rename = "fundingFeeRate")]
    funding_fee_rate: Option<f64>,
    #[serde(rename = "markPrice")]
    mark_price: Option<f64>,
    #[serde(rename = "indexPrice")]
    index_price: Option<f64>,
    #[serde(rename = "openInterest")]
    open_interest: Option<String>,
    #[serde(rename = "fundingRateGranularity")]
    funding_rate_granularity_ms: Option<i64>,
    #[serde(rename = "isInverse")]
    is_inverse: bool,
}

#[derive(Debug, Deserialize)]
struct CurrentFundingRate {
    symbol: String,
    value: f64,
    #[serde(rename = "granularity")]
    granularity_ms: i64,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    timepoint: i64,
}

#[async_trait]
impl Exchange for KucoinAdapter {
    fn name(&self) -> &'static str {
        "kucoin"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<KucoinEnvelope<Vec<ContractEntry>>> =
            self.http.get_json(&format!("{BASE_URL}/api/v1/contracts/active"), &[], cancel).await;

        let contracts = match resp {
            Ok(env) if env.code == "200000" => {
                report.success("GET /api/v1/contracts/active");
                env.data
            }
            Ok(env) => {
                report.failure("GET /api/v1/contracts/active", false, format!("code {}", env.code));
                return (snapshots, report);
            }
            Err(e) => {
                report.failure("GET /api/v1/contracts/active", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for contract in contracts {
            if contract.status != "Open" {
                continue;
            }

            let rate = match contract.funding_fee_rate {
                Some(r) => r,
                None => match fetch_current_rate(&self.http, &contract.symbol, cancel, &mut report).await {
                    Some(r) => r,
                    None => continue,
                },
            };
            let Ok(rate) = Decimal::try_from(rate) else { continue };

            let Some(interval_hours) = contract
                .funding_rate_granularity_ms
                .map(|ms| ((ms / 3_600_000).max(1)) as i32)
                .filter(|h| crate::models::is_valid_funding_interval(*h))
            else {
                continue;
            };

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: contract.symbol.clone(),
                base_asset: normalize_base_asset(&contract.base_currency),
                quote_asset: contract.quote_currency,
                funding_rate: rate,
                funding_interval_hours: interval_hours,
                mark_price: contract.mark_price.and_then(|v| Decimal::try_from(v).ok()),
                index_price: contract.index_price.and_then(|v| Decimal::try_from(v).ok()),
                open_interest: contract.open_interest.and_then(|s| Decimal::from_str(&s).ok()),
                open_interest_unit: OpenInterestUnit::BaseAsset,
                contract_type: if contract.is_inverse { ContractType::Inverse } else { ContractType::Linear },
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
        let resp: KucoinEnvelope<Vec<FundingHistoryEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v1/contract/funding-rates"),
                &[
                    ("symbol", symbol.to_string()),
                    ("from", start.timestamp_millis().to_string()),
                    ("to", end.timestamp_millis().to_string()),
                ],
                cancel,
            )
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|e| {
                Some(FundingPoint {
                    exchange: "kucoin".to_string(),
                    symbol: e.symbol,
                    funding_time: Utc.timestamp_millis_opt(e.timepoint).single()?,
                    funding_rate: Decimal::try_from(e.funding_rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: KucoinEnvelope<Vec<ContractEntry>> =
            self.http.get_json(&format!("{BASE_URL}/api/v1/contracts/active"), &[], cancel).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.status == "Open")
            .filter_map(|c| {
                let interval_hours = c
                    .funding_rate_granularity_ms
                    .map(|ms| ((ms / 3_600_000).max(1)) as i32)
                    .filter(|h| crate::models::is_valid_funding_interval(*h))?;
                Some(ContractMeta {
                    base_asset: normalize_base_asset(&c.base_currency),
                    quote_asset: c.quote_currency,
                    symbol: c.symbol,
                    funding_interval_hours: interval_hours,
                })
            })
            .collect())
    }
}

async fn fetch_current_rate(
    http: &RateLimitedClient,
    symbol: &str,
    cancel: &CancellationToken,
    report: &mut AdapterReport,
) -> Option<f64> {
    let resp: Result<KucoinEnvelope<CurrentFundingRate>> = http
        .get_json(&format!("{BASE_URL}/api/v1/funding-rate/{symbol}/current"), &[], cancel)
        .await;
    match resp {
        Ok(env) => {
            report.success(format!("GET /api/v1/funding-rate/{symbol}/current"));
            Some(env.data.value)
        }
        Err(e) => {
            report.failure(format!("GET /api/v1/funding-rate/{symbol}/current"), e.is_retryable(), e.to_string());
            None
        }
    }
}
