//! Binance USD-M futures adapter: CEX REST, paginated.
//!
//! Funding rate and mark price come from `/fapi/v1/premiumIndex` (one call,
//! covers every symbol); open interest requires one call per symbol via
//! `/fapi/v1/openInterest`, which this adapter paginates across the
//! contract list in small batches to stay inside the per-cycle budget.

use crate::cancellation::CancellationToken;
use crate::error::{ObservatoryError, Result};
use crate::exchanges::{AdapterReport, Exchange};
use crate::http::RateLimitedClient;
use crate::models::{ContractMeta, ContractSnapshot, ContractType, FundingPoint, MarketType, OpenInterestUnit};
use crate::normalize::normalize_base_asset;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

const BASE_URL: &str = "https://fapi.binance.com";
/// Number of symbols to fetch open interest for per cycle; keeps the
/// adapter inside its `max_cycle_duration` budget even with hundreds of
/// listed contracts.
const OI_BATCH_SIZE: usize = 40;

pub struct BinanceAdapter {
    http: RateLimitedClient,
}

impl BinanceAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct PremiumIndexEntry {
    symbol: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "indexPrice")]
    index_price: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct OpenInterestEntry {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct FundingRateHistoryEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoSymbol {
    symbol: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    status: String,
}

#[async_trait]
impl Exchange for BinanceAdapter {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let premium: Result<Vec<PremiumIndexEntry>> = self
            .http
            .get_json(&format!("{BASE_URL}/fapi/v1/premiumIndex"), &[], cancel)
            .await;

        let entries = match premium {
            Ok(entries) => {
                report.success("GET /fapi/v1/premiumIndex");
                entries
            }
            Err(e) => {
                report.failure("GET /fapi/v1/premiumIndex", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for (i, entry) in entries.iter().enumerate() {
            // premiumIndex doesn't report the interval directly; infer it
            // from the delta to the contract's own next settlement instead
            // of assuming the 8h majority case.
            let Some(next_funding_at) = Utc.timestamp_millis_opt(entry.next_funding_time).single() else {
                report.failure("parse premiumIndex", false, format!("bad nextFundingTime for {}", entry.symbol));
                continue;
            };
            let delta_hours = crate::models::hours_between(now, next_funding_at);
            let Some(interval_hours) = crate::models::infer_funding_interval_hours(delta_hours) else {
                report.failure(
                    &entry.symbol,
                    false,
                    format!("ambiguous funding interval ({delta_hours:.2}h to next funding)"),
                );
                continue;
            };

            let Some(base_raw) = entry.symbol.strip_suffix("USDT").or_else(|| entry.symbol.strip_suffix("USD")) else {
                continue;
            };
            let base_asset = normalize_base_asset(base_raw);

            let open_interest = if i < OI_BATCH_SIZE {
                fetch_open_interest(&self.http, &entry.symbol, cancel, &mut report).await
            } else {
                None
            };

            let Ok(mark_price) = Decimal::from_str(&entry.mark_price) else {
                report.failure("parse premiumIndex", false, format!("bad mark price for {}", entry.symbol));
                continue;
            };
            let Ok(funding_rate) = Decimal::from_str(&entry.last_funding_rate) else {
                report.failure("parse premiumIndex", false, format!("bad funding rate for {}", entry.symbol));
                continue;
            };
            let index_price = Decimal::from_str(&entry.index_price).ok();

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: entry.symbol.clone(),
                base_asset,
                quote_asset: if entry.symbol.ends_with("USDT") { "USDT".into() } else { "USD".into() },
                funding_rate,
                funding_interval_hours: interval_hours,
                mark_price: Some(mark_price),
                index_price,
                open_interest,
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
        let mut cursor_start = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        loop {
            let entries: Vec<FundingRateHistoryEntry> = self
                .http
                .get_json(
                    &format!("{BASE_URL}/fapi/v1/fundingRate"),
                    &[
                        ("symbol", symbol.to_string()),
                        ("startTime", cursor_start.to_string()),
                        ("endTime", end_ms.to_string()),
                        ("limit", "1000".to_string()),
                    ],
                    cancel,
                )
                .await?;

            if entries.is_empty() {
                break;
            }

            let last_time = entries.last().map(|e| e.funding_time).unwrap_or(cursor_start);
            for e in &entries {
                let Ok(rate) = Decimal::from_str(&e.funding_rate) else { continue };
                points.push(FundingPoint {
                    exchange: self.name().to_string(),
                    symbol: e.symbol.clone(),
                    funding_time: Utc.timestamp_millis_opt(e.funding_time).single().unwrap_or(end),
                    funding_rate: rate,
                    mark_price: None,
                    funding_interval_hours: 8,
                });
            }

            if entries.len() < 1000 || last_time <= cursor_start {
                break;
            }
            cursor_start = last_time + 1;
            if cursor_start >= end_ms {
                break;
            }
        }

        Ok(points)
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let info: ExchangeInfoResponse = self
            .http
            .get_json(&format!("{BASE_URL}/fapi/v1/exchangeInfo"), &[], cancel)
            .await?;

        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| ContractMeta {
                base_asset: normalize_base_asset(
                    s.symbol.strip_suffix(&s.quote_asset).unwrap_or(&s.symbol),
                ),
                quote_asset: s.quote_asset,
                symbol: s.symbol,
                funding_interval_hours: 8,
            })
            .collect())
    }
}

async fn fetch_open_interest(
    http: &RateLimitedClient,
    symbol: &str,
    cancel: &CancellationToken,
    report: &mut AdapterReport,
) -> Option<Decimal> {
    let result: Result<OpenInterestEntry> = http
        .get_json(
            &format!("{BASE_URL}/fapi/v1/openInterest"),
            &[("symbol", symbol.to_string())],
            cancel,
        )
        .await;

    match result {
        Ok(entry) => {
            report.success(format!("GET /fapi/v1/openInterest?symbol={symbol}"));
            Decimal::from_str(&entry.open_interest).ok()
        }
        Err(e) => {
            report.failure(
                format!("GET /fapi/v1/openInterest?symbol={symbol}"),
                e.is_retryable(),
                e.to_string(),
            );
            let _ = ObservatoryError::Parse(String::new());
            None
        }
    }
}
