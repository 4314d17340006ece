//! Hyperliquid adapter: DEX, single-call.
//!
//! One POST to `/info` with `{"type":"metaAndAssetCtxs"}` returns the full
//! universe of perpetuals plus funding rate, mark price, oracle price and
//! open interest for every one of them — no pagination, no per-symbol
//! fallback. Funding is natively hourly; stored as-is rather than rescaled,
//! the same convention used for Deribit and Kraken.

use crate::cancellation::CancellationToken;
use crate::error::{ObservatoryError, Result};
use crate::exchanges::{AdapterReport, Exchange};
use crate::http::RateLimitedClient;
use crate::models::{ContractMeta, ContractSnapshot, ContractType, FundingPoint, MarketType, OpenInterestUnit};
use crate::normalize::normalize_base_asset;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://api.hyperliquid.xyz";

pub struct HyperliquidAdapter {
    http: RateLimitedClient,
}

impl HyperliquidAdapter {
    pub fn new(http: RateLimitedClient) -> Self {
        Self { http }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum InfoRequest {
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs,
    #[serde(rename = "fundingHistory")]
    FundingHistory {
        coin: String,
        #[serde(rename = "startTime")]
        start_time: i64,
        #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
        end_time: Option<i64>,
    },
}

type MetaAndAssetCtxsResponse = (Meta, Vec<AssetCtx>);

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<AssetMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMeta {
    name: String,
    #[serde(default)]
    only_isolated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetCtx {
    #[serde(deserialize_with = "deserialize_decimal_str")]
    funding: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    open_interest: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    oracle_px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    mark_px: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingHistoryRecord {
    #[serde(deserialize_with = "deserialize_decimal_str")]
    funding_rate: Decimal,
    time: i64,
}

fn deserialize_decimal_str<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

#[async_trait]
impl Exchange for HyperliquidAdapter {
    fn name(&self) -> &'static str {
        "hyperliquid"
    }

    fn rate_limiter(&self) -> std::sync::Arc<crate::rate_limiter::RateLimiter> {
        self.http.limiter()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
        let mut report = AdapterReport::default();
        let mut snapshots = Vec::new();

        let resp: Result<MetaAndAssetCtxsResponse> = self
            .http
            .post_json(&format!("{BASE_URL}/info"), &InfoRequest::MetaAndAssetCtxs, cancel)
            .await;

        let (meta, ctxs) = match resp {
            Ok(pair) => {
                report.success("POST /info metaAndAssetCtxs");
                pair
            }
            Err(e) => {
                report.failure("POST /info metaAndAssetCtxs", e.is_retryable(), e.to_string());
                return (snapshots, report);
            }
        };

        let now = Utc::now();
        for (asset, ctx) in meta.universe.into_iter().zip(ctxs.into_iter()) {
            if asset.only_isolated {
                continue;
            }
            snapshots.push(ContractSnapshot {
                exchange: self.name().to_string(),
                symbol: asset.name.clone(),
                base_asset: normalize_base_asset(&asset.name),
                quote_asset: "USD".to_string(),
                funding_rate: ctx.funding,
                funding_interval_hours: 1,
                mark_price: Some(ctx.mark_px),
                index_price: Some(ctx.oracle_px),
                open_interest: Some(ctx.open_interest),
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
        let request = InfoRequest::FundingHistory {
            coin: symbol.to_string(),
            start_time: start.timestamp_millis(),
            end_time: Some(end.timestamp_millis()),
        };
        let records: Vec<FundingHistoryRecord> =
            self.http.post_json(&format!("{BASE_URL}/info"), &request, cancel).await?;

        records
            .into_iter()
            .map(|r| {
                let funding_time = Utc
                    .timestamp_millis_opt(r.time)
                    .single()
                    .ok_or_else(|| ObservatoryError::Parse(format!("bad timestamp {} for {}", r.time, symbol)))?;
                Ok(FundingPoint {
                    exchange: "hyperliquid".to_string(),
                    symbol: symbol.to_string(),
                    funding_time,
                    funding_rate: r.funding_rate,
                    mark_price: None,
                    funding_interval_hours: 1,
                })
            })
            .collect()
    }

    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
        let (meta, _): MetaAndAssetCtxsResponse =
            self.http.post_json(&format!("{BASE_URL}/info"), &InfoRequest::MetaAndAssetCtxs, cancel).await?;

        Ok(meta
            .universe
            .into_iter()
            .filter(|a| !a.only_isolated)
            .map(|a| ContractMeta {
                base_asset: normalize_base_asset(&a.name),
                quote_asset: "USD".to_string(),
                symbol: a.name,
                funding_interval_hours: 1,
            })
            .collect())
    }
}
