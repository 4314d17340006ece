//! OKX swap adapter: CEX REST, bulk with per-symbol fallback.
//!
//! `/api/v5/public/funding-rate?instId=ANY` doesn't exist; OKX instead
//! requires one call per instrument for funding rate but a single bulk call
//! for tickers (mark/index/open interest). We fetch the instrument list and
//! tickers in bulk, then fall back to per-symbol funding-rate calls only for
//! symbols the bulk path didn't cover (OKX's ticker payload omits funding
//! rate entirely, so in practice every symbol takes the per-symbol path;
//! the bulk call still earns its keep for price/OI and contract discovery).

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

const BASE_URL: &str = "https://www.okx.com";
const MAX_SYMBOLS_PER_CYCLE: usize = 60;

pub struct OkxAdapter {
    http: RateLimitedClient,
}

impl OkxAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct OkxEnvelope<T> {
    code: String,
    msg: String,
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct InstrumentEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "settleCcy")]
    settle_ccy: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct FundingRateEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: String,
}

#[derive(Debug, Deserialize)]
struct MarkPriceEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "markPx")]
    mark_px: String,
}

#[derive(Debug, Deserialize)]
struct OpenInterestEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    oi: String,
}

#[derive(Debug, Deserialize)]
struct FundingRateHistoryEntry {
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: String,
}

#[async_trait]
impl Exchange for OkxAdapter {
    fn name(&self) -> &'static str {
        "okx"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let instruments: Result<OkxEnvelope<InstrumentEntry>> = self
            .http
            .get_json(&format!("{BASE_URL}/api/v5/public/instruments"), &[("instType", "SWAP".to_string())], cancel)
            .await;
        let instruments = match instruments {
            Ok(env) if env.code == "0" => {
                report.success("GET /api/v5/public/instruments");
                env.data
            }
            Ok(env) => {
                report.failure("GET /api/v5/public/instruments", false, env.msg);
                return (snapshots, report);
            }
            Err(e) => {
                report.failure("GET /api/v5/public/instruments", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let mark_prices: OkxEnvelope<MarkPriceEntry> = match self
            .http
            .get_json(&format!("{BASE_URL}/api/v5/public/mark-price"), &[("instType", "SWAP".to_string())], cancel)
            .await
        {
            Ok(env) => {
                report.success("GET /api/v5/public/mark-price");
                env
            }
            Err(e) => {
                report.failure("GET /api/v5/public/mark-price", e.is_retryable(), e.to_string());
                OkxEnvelope { code: "1".into(), msg: String::new(), data: Vec::new() }
            }
        };
        let mark_by_inst: std::collections::HashMap<String, Decimal> = mark_prices
            .data
            .into_iter()
            .filter_map(|e| Decimal::from_str(&e.mark_px).ok().map(|d| (e.inst_id, d)))
            .collect();

        let open_interest: OkxEnvelope<OpenInterestEntry> = match self
            .http
            .get_json(&format!("{BASE_URL}/api/v5/public/open-interest"), &[("instType", "SWAP".to_string())], cancel)
            .await
        {
            Ok(env) => {
                report.success("GET /api/v5/public/open-interest");
                env
            }
            Err(e) => {
                report.failure("GET /api/v5/public/open-interest", e.is_retryable(), e.to_string());
                OkxEnvelope { code: "1".into(), msg: String::new(), data: Vec::new() }
            }
        };
        let oi_by_inst: std::collections::HashMap<String, Decimal> = open_interest
            .data
            .into_iter()
            .filter_map(|e| Decimal::from_str(&e.oi).ok().map(|d| (e.inst_id, d)))
            .collect();

        let now = Utc::now();
        let active: Vec<_> = instruments.into_iter().filter(|i| i.state == "live").collect();

        for inst in active.iter().take(MAX_SYMBOLS_PER_CYCLE) {
            let funding: Result<OkxEnvelope<FundingRateEntry>> = self
                .http
                .get_json(
                    &format!("{BASE_URL}/api/v5/public/funding-rate"),
                    &[("instId", inst.inst_id.clone())],
                    cancel,
                )
                .await;
            let Ok(env) = funding else { continue };
            if env.code != "0" {
                report.failure(format!("GET /api/v5/public/funding-rate?instId={}", inst.inst_id), false, env.msg);
                continue;
            }
            let Some(entry) = env.data.into_iter().next() else { continue };
            let Ok(rate) = Decimal::from_str(&entry.funding_rate) else { continue };
            report.success(format!("GET /api/v5/public/funding-rate?instId={}", inst.inst_id));

            let base_raw = inst.inst_id.split('-').next().unwrap_or(&inst.inst_id);
            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: inst.inst_id.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: inst.settle_ccy.clone(),
                funding_rate: rate,
                funding_interval_hours: 8,
                mark_price: mark_by_inst.get(&inst.inst_id).copied(),
                index_price: None,
                open_interest: oi_by_inst.get(&inst.inst_id).copied(),
                open_interest_unit: OpenInterestUnit::BaseAsset,
                contract_type: if inst.settle_ccy == "USDT" || inst.settle_ccy == "USDC" {
                    ContractType::Linear
                } else {
                    ContractType::Inverse
                },
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
        let resp: OkxEnvelope<FundingRateHistoryEntry> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v5/public/funding-rate-history"),
                &[
                    ("instId", symbol.to_string()),
                    ("before", (start.timestamp_millis() - 1).to_string()),
                    ("after", (end.timestamp_millis() + 1).to_string()),
                    ("limit", "100".to_string()),
                ],
                cancel,
            )
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|e| {
                let rate = Decimal::from_str(&e.funding_rate).ok()?;
                let ts = e.funding_time.parse::<i64>().ok()?;
                Some(FundingPoint {
                    exchange: "okx".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: Utc.timestamp_millis_opt(ts).single()?,
                    funding_rate: rate,
                    mark_price: None,
                    funding_interval_hours: 8,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: OkxEnvelope<InstrumentEntry> = self
            .http
            .get_json(&format!("{BASE_URL}/api/v5/public/instruments"), &[("instType", "SWAP".to_string())], cancel)
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|i| i.state == "live")
            .map(|i| {
                let base_raw = i.inst_id.split('-').next().unwrap_or(&i.inst_id).to_string();
                ContractMeta {
                    base_asset: normalize_base_asset(&base_raw),
                    quote_asset: i.settle_ccy,
                    symbol: i.inst_id,
                    funding_interval_hours: 8,
                }
            })
            .collect())
    }
}
