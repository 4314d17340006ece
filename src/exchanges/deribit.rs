//! Deribit perpetual adapter: CEX REST, bulk with per-symbol fallback.
//!
//! Deribit perpetuals settle funding continuously rather than in discrete
//! 8-hour windows: `current_funding` is already expressed as an hourly
//! rate. We store it with `funding_interval_hours = 1` rather than
//! rescaling it into a synthetic 8-hour-equivalent number, so the stored
//! `funding_rate` is what Deribit actually reports and the APR formula
//! needs no venue-specific correction.

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

const BASE_URL: &str = "https://www.deribit.com";

pub struct DeribitAdapter {
    http: RateLimitedClient,
}

impl DeribitAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    #[serde(rename = "current_funding")]
    current_funding: Option<f64>,
    #[serde(rename = "mark_price")]
    mark_price: f64,
    #[serde(rename = "index_price")]
    index_price: f64,
    #[serde(rename = "open_interest")]
    open_interest: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InstrumentEntry {
    #[serde(rename = "instrument_name")]
    instrument_name: String,
    #[serde(rename = "base_currency")]
    base_currency: String,
    #[serde(rename = "quote_currency")]
    quote_currency: String,
    #[serde(rename = "is_active")]
    is_active: bool,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    #[serde(rename = "interest_1h")]
    interest_1h: f64,
    timestamp: i64,
}

#[async_trait]
impl Exchange for DeribitAdapter {
    fn name(&self) -> &'static str {
        "deribit"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let instruments: Result<RpcEnvelope<Vec<InstrumentEntry>>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v2/public/get_instruments"),
                &[("currency", "any".to_string()), ("kind", "perpetual".to_string())],
                cancel,
            )
            .await;

        let instruments = match instruments {
            Ok(env) => {
                report.success("GET /api/v2/public/get_instruments");
                env.result
            }
            Err(e) => {
                report.failure("GET /api/v2/public/get_instruments", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for inst in instruments.into_iter().filter(|i| i.is_active && i.kind == "future") {
            let ticker: Result<RpcEnvelope<TickerResult>> = self
                .http
                .get_json(
                    &format!("{BASE_URL}/api/v2/public/ticker"),
                    &[("instrument_name", inst.instrument_name.clone())],
                    cancel,
                )
                .await;

            match ticker {
                Ok(env) => {
                    report.success(format!("GET /api/v2/public/ticker?instrument_name={}", inst.instrument_name));
                    let Some(funding) = env.result.current_funding else { continue };
                    let Ok(rate) = Decimal::try_from(funding) else { continue };

                    snapshots.push(ContractSnapshot {
                        exchange: self.name().to_string(),
                        symbol: inst.instrument_name.clone(),
                        base_asset: normalize_base_asset(&inst.base_currency),
                        quote_asset: inst.quote_currency,
                        funding_rate: rate,
                        funding_interval_hours: 1,
                        mark_price: Decimal::try_from(env.result.mark_price).ok(),
                        index_price: Decimal::try_from(env.result.index_price).ok(),
                        open_interest: env.result.open_interest.and_then(|v| Decimal::try_from(v).ok()),
                        open_interest_unit: OpenInterestUnit::BaseAsset,
                        contract_type: ContractType::Inverse,
                        market_type: MarketType::Perp,
                        timestamp: now,
                    });
                }
                Err(e) => {
                    report.failure(
                        format!("GET /api/v2/public/ticker?instrument_name={}", inst.instrument_name),
                        e.is_retryable(),
                        e.to_string(),
                    );
                }
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
        let resp: RpcEnvelope<Vec<FundingHistoryEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v2/public/get_funding_rate_history"),
                &[
                    ("instrument_name", symbol.to_string()),
                    ("start_timestamp", start.timestamp_millis().to_string()),
                    ("end_timestamp", end.timestamp_millis().to_string()),
                ],
                cancel,
            )
            .await?;

        Ok(resp
            .result
            .into_iter()
            .filter_map(|e| {
                Some(FundingPoint {
                    exchange: "deribit".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: Utc.timestamp_millis_opt(e.timestamp).single()?,
                    funding_rate: Decimal::try_from(e.interest_1h).ok()?,
                    mark_price: None,
                    funding_interval_hours: 1,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: RpcEnvelope<Vec<InstrumentEntry>> = self
            .http
            .get_json(
                &format!("{BASE_URL}/api/v2/public/get_instruments"),
                &[("currency", "any".to_string()), ("kind", "perpetual".to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .result
            .into_iter()
            .filter(|i| i.is_active && i.kind == "future")
            .map(|i| ContractMeta {
                base_asset: normalize_base_asset(&i.base_currency),
                quote_asset: i.quote_currency,
                symbol: i.instrument_name,
                funding_interval_hours: 1,
            })
            .collect())
    }
}
