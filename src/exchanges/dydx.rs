//! dYdX v4 adapter: DEX, single-call.
//!
//! The indexer's `/v4/perpetualMarkets` returns every market's funding
//! rate, oracle price and open interest in one response. Funding here is
//! also natively hourly, matching Hyperliquid's convention.

use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::exchanges::{AdapterReport, Exchange};
use crate::http::RateLimitedClient;
use crate::models::{ContractMeta, ContractSnapshot, ContractType, FundingPoint, MarketType, OpenInterestUnit};
use crate::normalize::normalize_base_asset;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

const BASE_URL: &str = "https://indexer.dydx.trade";

pub struct DydxAdapter {
    http: RateLimitedClient,
}

impl DydxAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct PerpetualMarketsResponse {
    markets: HashMap<String, MarketEntry>,
}

#[derive(Debug, Deserialize)]
struct MarketEntry {
    ticker: String,
    status: String,
    #[serde(rename = "nextFundingRate")]
    next_funding_rate: String,
    #[serde(rename = "oraclePrice")]
    oracle_price: String,
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct HistoricalFundingResponse {
    #[serde(rename = "historicalFunding")]
    historical_funding: Vec<HistoricalFundingEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoricalFundingEntry {
    rate: String,
    #[serde(rename = "effectiveAt")]
    effective_at: String,
}

#[async_trait]
impl Exchange for DydxAdapter {
    fn name(&self) -> &'static str {
        "dydx"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<PerpetualMarketsResponse> = self
            .http
            .get_json(&format!("{BASE_URL}/v4/perpetualMarkets"), &[], cancel)
            .await;

        let markets = match resp {
            Ok(r) => {
                report.success("GET /v4/perpetualMarkets");
                r.markets
            }
            Err(e) => {
                report.failure("GET /v4/perpetualMarkets", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for (_, m) in markets {
            if m.status != "ACTIVE" {
                continue;
            }
            let Ok(rate) = Decimal::from_str(&m.next_funding_rate) else { continue };
            let base_raw = m.ticker.split('-').next().unwrap_or(&m.ticker);

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: m.ticker.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: "USD".to_string(),
                funding_rate: rate,
                funding_interval_hours: 1,
                mark_price: Decimal::from_str(&m.oracle_price).ok(),
                index_price: Decimal::from_str(&m.oracle_price).ok(),
                open_interest: Decimal::from_str(&m.open_interest).ok(),
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
        let resp: HistoricalFundingResponse = self
            .http
            .get_json(
                &format!("{BASE_URL}/v4/historicalFunding/{symbol}"),
                &[("limit", "1000".to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .historical_funding
            .into_iter()
            .filter_map(|e| {
                let ts = DateTime::parse_from_rfc3339(&e.effective_at).ok()?.with_timezone(&Utc);
                if ts < start || ts > end {
                    return None;
                }
                Some(FundingPoint {
                    exchange: "dydx".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: ts,
                    funding_rate: Decimal::from_str(&e.rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 1,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: PerpetualMarketsResponse =
            self.http.get_json(&format!("{BASE_URL}/v4/perpetualMarkets"), &[], cancel).await?;

        Ok(resp
            .markets
            .into_values()
            .filter(|m| m.status == "ACTIVE")
            .map(|m| {
                let base_raw = m.ticker.split('-').next().unwrap_or(&m.ticker).to_string();
                ContractMeta {
                    base_asset: normalize_base_asset(&base_raw),
                    quote_asset: "USD".to_string(),
                    symbol: m.ticker,
                    funding_interval_hours: 1,
                }
            })
            .collect())
    }
}
