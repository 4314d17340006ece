//! Kraken Futures adapter: CEX REST, bulk with per-symbol fallback.
//!
//! Kraken's `/derivatives/api/v3/tickers` reports `fundingRate` as an
//! absolute per-contract value (rate already multiplied by mark price),
//! not the relative rate every other venue reports. We divide by
//! `markPrice` to recover the relative rate before it ever reaches
//! [`crate::models::ContractSnapshot`], so downstream APR and arbitrage
//! math never special-cases this venue.

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

const BASE_URL: &str = "https://futures.kraken.com";

pub struct KrakenAdapter {
    http: RateLimitedClient,
}

impl KrakenAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    tickers: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<f64>,
    #[serde(rename = "markPrice")]
    mark_price: f64,
    #[serde(rename = "indexPrice")]
    index_price: Option<f64>,
    #[serde(rename = "openInterest")]
    open_interest: Option<f64>,
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    instruments: Vec<InstrumentEntry>,
}

#[derive(Debug, Deserialize)]
struct InstrumentEntry {
    symbol: String,
    #[serde(rename = "underlying")]
    underlying: Option<String>,
    tradeable: bool,
    #[serde(rename = "contractType")]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryResponse {
    rates: Vec<FundingHistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    #[serde(rename = "relativeFundingRate")]
    relative_funding_rate: f64,
    timestamp: String,
}

#[async_trait]
impl Exchange for KrakenAdapter {
    fn name(&self) -> &'static str {
        "kraken"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<TickersResponse> =
            self.http.get_json(&format!("{BASE_URL}/derivatives/api/v3/tickers"), &[], cancel).await;

        let tickers = match resp {
            Ok(t) => {
                report.success("GET /derivatives/api/v3/tickers");
                t.tickers
            }
            Err(e) => {
                report.failure("GET /derivatives/api/v3/tickers", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for t in tickers {
            if t.tag.as_deref() != Some("perpetual") && !t.symbol.starts_with("PF_") {
                continue;
            }
            let Some(absolute_rate) = t.funding_rate else { continue };
            if t.mark_price == 0.0 {
                continue;
            }
            let relative_rate = absolute_rate / t.mark_price;
            let Ok(rate) = Decimal::try_from(relative_rate) else { continue };

            let base_raw = t.symbol.strip_prefix("PF_").unwrap_or(&t.symbol);
            let base_raw = base_raw.strip_suffix("USD").unwrap_or(base_raw);

            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: t.symbol.clone(),
                base_asset: normalize_base_asset(base_raw),
                quote_asset: "USD".to_string(),
                funding_rate: rate,
                funding_interval_hours: 1,
                mark_price: Decimal::try_from(t.mark_price).ok(),
                index_price: t.index_price.and_then(|v| Decimal::try_from(v).ok()),
                open_interest: t.open_interest.and_then(|v| Decimal::try_from(v).ok()),
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
        let resp: FundingHistoryResponse = self
            .http
            .get_json(
                &format!("{BASE_URL}/derivatives/api/v4/historicalfundingrates"),
                &[("symbol", symbol.to_string())],
                cancel,
            )
            .await?;

        Ok(resp
            .rates
            .into_iter()
            .filter_map(|e| {
                let ts = DateTime::parse_from_rfc3339(&e.timestamp).ok()?.with_timezone(&Utc);
                if ts < start || ts > end {
                    return None;
                }
                Some(FundingPoint {
                    exchange: "kraken".to_string(),
                    symbol: symbol.to_string(),
                    funding_time: ts,
                    funding_rate: Decimal::try_from(e.relative_funding_rate).ok()?,
                    mark_price: None,
                    funding_interval_hours: 1,
                })
            })
            .collect())
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let resp: InstrumentsResponse =
            self.http.get_json(&format!("{BASE_URL}/derivatives/api/v3/instruments"), &[], cancel).await?;

        Ok(resp
            .instruments
            .into_iter()
            .filter(|i| i.tradeable && i.contract_type.as_deref() == Some("flexible_futures"))
            .map(|i| {
                let base_raw = i.underlying.unwrap_or_else(|| i.symbol.clone());
                ContractMeta {
                    base_asset: normalize_base_asset(&base_raw),
                    quote_asset: "USD".to_string(),
                    symbol: i.symbol,
                    funding_interval_hours: 1,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_funding_rate_divided_by_mark_price_yields_relative_rate() {
        let absolute_rate = 1.5_f64;
        let mark_price = 30_000.0_f64;
        let relative = absolute_rate / mark_price;
        assert!((relative - 0.00005).abs() < 1e-9);
    }
}
