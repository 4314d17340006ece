//! HTX (Huobi) swap adapter: CEX REST, bulk with per-symbol fallback.
//!
//! Linear swaps: `/linear-swap-api/v1/swap_batch_funding_rate`, one call
//! for every USDT-margined contract. Index price is joined in from
//! `/index/market/his_index` in the same cycle; HTX's batch endpoints don't
//! expose mark price or open interest, so those fields are left `None`.

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

const BASE_URL: &str = "https://api.hbdm.com";

pub struct HtxAdapter {
    http: RateLimitedClient,
}

impl HtxAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct HtxEnvelope<T> {
    status: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct FundingRateEntry {
    contract_code: String,
    #[serde(rename = "funding_rate")]
    funding_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexPriceEntry {
    contract_code: String,
    index_price: f64,
}

#[derive(Debug, Deserialize)]
struct ContractInfoEntry {
    contract_code: String,
    symbol: String,
    contract_status: i32,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    contract_code: String,
    funding_rate: String,
    funding_time: String,
}

#[async_trait]
impl Exchange for HtxAdapter {
    fn name(&self) -> &'static str {
        "htx"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<HtxEnvelope<Vec<FundingRateEntry>>> = self
            .http
            .get_json(&format!("{BASE_URL}/linear-swap-api/v1/swap_batch_funding_rate"), &[], cancel)
            .await;

        let rates = match resp {
            Ok(env) if env.status == "ok" => {
                report.success("GET /linear-swap-api/v1/swap_batch_funding_rate");
                env.data
            }
            Ok(_) => {
                report.failure("GET /linear-swap-api/v1/swap_batch_funding_rate", false, "status != ok".to_string());
                return (snapshots, report);
            }
            Err(e) => {
                report.failure(
                    "GET /linear-swap-api/v1/swap_batch_funding_rate",
                    e.is_retryable(),
                    e.to_string(),
                );
                return (snapshots, report);
            }
        };

        let index_prices: HtxEnvelope<Vec<IndexPriceEntry>> = self
            .http
            .get_json(&format!("{BASE_URL}/index/market/his_index"), &[], cancel)
            .await
            .unwrap_or(HtxEnvelope { status: "error".into(), data: Vec::new() });
        let index_by_code: std::collections::HashMap<String, f64> =
            index_prices.data.into_iter().map(|e| (e.contract_code, e.index_price)).collect();

        let now = Utc::now();
        for entry in rates {
            let Some(raw_rate) = entry.funding_rate else { continue };
            let Ok(rate) = Decimal::from_str(&raw_rate) else { continue };
            let base_raw = entry.contract_code.split('-').next().unwrap_or(&entry.contract_code);

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: entry.contract_code.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: "USDT".to_string(),
                funding_rate: rate,
                funding_interval_hours: 8,
                mark_price: None,
                index_price: index_by_code.get(&entry.contract_code).and_then(|v| Decimal::try_from(*v).ok()),
                open_interest: None,
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
        let resp: HtxEnvelope<Vec<FundingHistoryEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/linear-swap-api/v1/swap_historical_funding_rate"),
                &[("contract_code", symbol.to_string()), ("page_size", "50".to_string())],
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
                    exchange: "htx".to_string(),
                    symbol: e.contract_code,
                    funding_time: Utc.timestamp_millis_opt(ts).single()?,
                    funding_rate: Decimal::from_str(&e.funding_rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: HtxEnvelope<Vec<ContractInfoEntry>> =
            self.http.get_json(&format!("{BASE_URL}/linear-swap-api/v1/swap_contract_info"), &[], cancel).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.contract_status == 1)
            .map(|c| ContractMeta {
                base_asset: normalize_base_asset(&c.symbol),
                quote_asset: "USDT".to_string(),
                symbol: c.contract_code,
                funding_interval_hours: 8,
            })
            .collect())
    }
}
