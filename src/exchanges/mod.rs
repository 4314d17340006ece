//! Exchange adapter capability trait and registry.
//!
//! Every adapter is a value implementing [`Exchange`], so the scheduler,
//! backfill runner, and registry all depend on one capability set
//! regardless of whether the venue is a paginated CEX REST API, a bulk
//! CEX API with per-symbol fallback, or a single-call DEX aggregator.

pub mod bitget;
pub mod bybit;
pub mod deribit;
pub mod dex_aggregator;
pub mod dydx;
pub mod gateio;
pub mod htx;
pub mod hyperliquid;
pub mod kraken;
pub mod kucoin;
pub mod mexc;
pub mod okx;

pub mod binance;

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::error::Result;
use crate::http::RateLimitedClient;
use crate::models::{ContractMeta, ContractSnapshot, FundingPoint};
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Per-request outcome, aggregated into an [`AdapterReport`] for one
/// `fetch()` cycle.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Success { endpoint: String },
    Failure { endpoint: String, retryable: bool, message: String },
}

/// Enumerates per-request outcomes for one polling cycle. Records with a
/// non-empty failure set do not prevent successful records from being
/// written.
#[derive(Debug, Clone, Default)]
pub struct AdapterReport {
    pub outcomes: Vec<RequestOutcome>,
}

impl AdapterReport {
    pub fn success(&mut self, endpoint: impl Into<String>) {
        self.outcomes.push(RequestOutcome::Success { endpoint: endpoint.into() });
    }

    pub fn failure(&mut self, endpoint: impl Into<String>, retryable: bool, message: impl Into<String>) {
        self.outcomes.push(RequestOutcome::Failure {
            endpoint: endpoint.into(),
            retryable,
            message: message.into(),
        });
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RequestOutcome::Failure { .. }))
            .count()
    }

    pub fn merge(&mut self, other: AdapterReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Capability set every adapter implements.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Stable, lowercase venue key (matches the `exchanges.<name>` config key).
    fn name(&self) -> &'static str;

    /// One polling cycle: a batch of normalized snapshots plus a report of
    /// per-request outcomes. Must not block longer than the caller's
    /// `max_cycle_duration`; partial results are expected under pressure.
    async fn fetch(&self, cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport);

    /// Bounded historical window, paginated internally by the adapter.
    async fn fetch_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FundingPoint>>;

    /// Used by backfill planning to enumerate `(symbol, interval, metadata)`.
    async fn list_contracts(&self, cancel: &CancellationToken) -> Result<Vec<ContractMeta>>;

    /// This adapter's rate limiter, so callers can read its spend counters
    /// (acquires/blocks/penalties) without going through a request.
    fn rate_limiter(&self) -> Arc<RateLimiter>;
}

/// All venue names known to the registry, used to seed a default
/// all-enabled configuration when none is supplied.
pub fn default_exchange_names() -> Vec<&'static str> {
    vec![
        "binance", "bybit", "okx", "kucoin", "gateio", "mexc", "bitget", "htx", "deribit",
        "kraken", "hyperliquid", "dydx", "dex_aggregator",
    ]
}

/// Construct the enabled adapters named in `config.exchanges`, wiring each
/// to its own [`RateLimiter`] built from that venue's configured token
/// bucket parameters.
pub fn build_registry(config: &Config, user_agent: &str) -> Vec<Arc<dyn Exchange>> {
    let shared_client = RateLimitedClient::shared_client(std::time::Duration::from_secs(15), user_agent);

    let mut registry: Vec<Arc<dyn Exchange>> = Vec::new();
    for name in default_exchange_names() {
        let Some(exchange_cfg) = config.exchanges.get(name) else {
            continue;
        };
        if !exchange_cfg.enabled {
            continue;
        }
        let limiter = RateLimiter::new(&exchange_cfg.rate_limit);
        let http = RateLimitedClient::new(shared_client.clone(), limiter, leak_name(name));

        let adapter: Arc<dyn Exchange> = match name {
            "binance" => Arc::new(binance::BinanceAdapter::new(http)),
            "bybit" => Arc::new(bybit::BybitAdapter::new(http)),
            "okx" => Arc::new(okx::OkxAdapter::new(http)),
            "kucoin" => Arc::new(kucoin::KucoinAdapter::new(http)),
            "gateio" => Arc::new(gateio::GateioAdapter::new(http)),
            "mexc" => Arc::new(mexc::MexcAdapter::new(http)),
            "bitget" => Arc::new(bitget::BitgetAdapter::new(http)),
            "htx" => Arc::new(htx::HtxAdapter::new(http)),
            "deribit" => Arc::new(deribit::DeribitAdapter::new(http)),
            "kraken" => Arc::new(kraken::KrakenAdapter::new(http)),
            "hyperliquid" => Arc::new(hyperliquid::HyperliquidAdapter::new(http)),
            "dydx" => Arc::new(dydx::DydxAdapter::new(http)),
            "dex_aggregator" => Arc::new(dex_aggregator::DexAggregatorAdapter::new(http)),
            _ => continue,
        };
        registry.push(adapter);
    }
    registry
}

/// Split a batch of live snapshots into those whose funding interval is one
/// of the valid discrete members and those that are not, recording a
/// failure for each rejected one. Adapters may still hand back a snapshot
/// with an unrecognized interval (a venue's metadata can drift); this is
/// the shared backstop that keeps such a record out of storage.
pub fn partition_valid_interval(
    snapshots: Vec<ContractSnapshot>,
    report: &mut AdapterReport,
) -> Vec<ContractSnapshot> {
    let mut valid = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        if crate::models::is_valid_funding_interval(snapshot.funding_interval_hours) {
            valid.push(snapshot);
        } else {
            report.failure(
                format!("{}:{}", snapshot.exchange, snapshot.symbol),
                false,
                format!(
                    "refusing to emit record with unrecognized funding interval {}h",
                    snapshot.funding_interval_hours
                ),
            );
        }
    }
    valid
}

fn leak_name(name: &str) -> &'static str {
    // Venue names are a small, fixed set known at compile time; leaking is
    // a one-time, bounded allocation for the process lifetime, acceptable
    // so `&'static str` can flow into the per-venue `RateLimitedClient`.
    Box::leak(name.to_string().into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_failure_does_not_discard_successes() {
        let mut report = AdapterReport::default();
        report.success("GET /funding");
        report.failure("GET /oi", true, "timeout");
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.outcomes.len(), 2);
    }

    fn snapshot(interval_hours: i32) -> ContractSnapshot {
        ContractSnapshot {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            funding_rate: Default::default(),
            funding_interval_hours: interval_hours,
            mark_price: None,
            index_price: None,
            open_interest: None,
            open_interest_unit: crate::models::OpenInterestUnit::Usd,
            contract_type: crate::models::ContractType::Linear,
            market_type: crate::models::MarketType::UsdM,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn partition_valid_interval_drops_unrecognized_intervals_and_reports_them() {
        let mut report = AdapterReport::default();
        let snapshots = vec![snapshot(8), snapshot(6), snapshot(1)];
        let valid = partition_valid_interval(snapshots, &mut report);
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|s| s.funding_interval_hours != 6));
        assert_eq!(report.failure_count(), 1);
    }
}
