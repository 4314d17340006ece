//! Query API.
//!
//! A single public `Router` (`Router::new()`, `.route(...)`, `CorsLayer`,
//! `.with_state(app_state)`) — there is no auth surface in this system.

pub mod errors;
pub mod routes;

use crate::backfill::status::BackfillStatus;
use crate::cache::Cache;
use crate::config::Config;
use crate::exchanges::Exchange;
use crate::metrics::Metrics;
use crate::storage::Storage;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub cache: Arc<Cache>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub backfill_status_path: Arc<PathBuf>,
    /// The live adapter registry, kept here so the performance endpoint can
    /// read each adapter's rate limiter counters.
    pub registry: Vec<Arc<dyn Exchange>>,
}

impl AppState {
    pub fn backfill_status(&self) -> anyhow::Result<Option<BackfillStatus>> {
        crate::backfill::status::read_status(&self.backfill_status_path)
    }
}

/// Build the full axum [`Router`], CORS-configured from `config.api.cors_origins`
/// and request-timed via `tower_http`'s trace layer.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(tower_http::cors::AllowOrigin::list(origins))
    };

    let request_timeout = Duration::from_secs(state.config.api.request_timeout_seconds);

    Router::new()
        .route("/api/funding-rates-grid", get(routes::funding_rates_grid))
        .route("/api/funding-rates", get(routes::funding_rates))
        .route(
            "/api/historical-funding-by-asset/:asset",
            get(routes::historical_by_asset),
        )
        .route(
            "/api/historical-funding-by-contract/:exchange/:symbol",
            get(routes::historical_by_contract),
        )
        .route("/api/contracts-with-zscores", get(routes::contracts_with_zscores))
        .route("/api/arbitrage/opportunities", get(routes::arbitrage_opportunities))
        .route("/api/backfill-status", get(routes::backfill_status))
        .route("/api/cache/clear", post(routes::clear_cache))
        .route("/api/health", get(routes::health))
        .route("/api/health/performance", get(routes::health_performance))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
