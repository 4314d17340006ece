//! Entry point: loads configuration, builds the exchange registry, and runs
//! either the live collection scheduler or the historical backfill runner,
//! optionally alongside the query API.
//!
//! `#[tokio::main]` startup: `init_tracing`, then a `dotenv`-then-env-driven
//! config load, then `axum::serve` on a bound `TcpListener` running
//! alongside whichever of the two collection modes was requested.

use clap::Parser;
use funding_observatory::api::{build_router, AppState};
use funding_observatory::arbitrage::ArbitrageScanner;
use funding_observatory::backfill::BackfillRunner;
use funding_observatory::cache::Cache;
use funding_observatory::cancellation::CancellationToken;
use funding_observatory::cli::{Cli, RunMode};
use funding_observatory::config::{CollectionMode, Config};
use funding_observatory::exchanges::{build_registry, Exchange};
use funding_observatory::metrics::Metrics;
use funding_observatory::scheduler::LiveScheduler;
use funding_observatory::stats::StatisticsEngine;
use funding_observatory::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Cadence for the background statistics-refresh and arbitrage-scan tasks
/// that run alongside the live scheduler. Matches the statistics engine's
/// active-zone cadence: each tick only the contracts whose
/// zone is actually due get recomputed, so polling this often costs little.
const BACKGROUND_TASK_INTERVAL_SECS: u64 = 30;

/// A live contract missing for this many seconds is marked inactive rather
/// than left to "latest wins forever": ten missed ticks at the default 30s cadence.
const STALE_CONTRACT_AFTER_SECS: i64 = 300;

/// Spread rows older than this are pruned, matching the statistics engine's rolling window.
const SPREAD_MAX_AGE_DAYS: i64 = 30;

const EXIT_CLEAN: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funding_observatory=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "fatal error");
            EXIT_RUNTIME_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match Config::load(Some(&cli.config)) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration error");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(interval) = cli.interval {
        config.collection.tick_seconds = interval;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if cli.parallel {
        config.collection.mode = CollectionMode::Parallel;
    } else if cli.sequential {
        config.collection.mode = CollectionMode::Sequential;
    }

    info!(mode = ?cli.mode, dsn = %config.database_dsn, "starting funding observatory");

    let storage = Arc::new(Storage::open(&config.database_dsn)?);
    let cache = Arc::new(Cache::new(config.cache.max_bytes));
    let metrics = Arc::new(Metrics::new());
    let cancel = CancellationToken::new();

    let mut registry = build_registry(&config, "funding-observatory/0.1");
    if !cli.exchanges.is_empty() {
        let wanted: std::collections::HashSet<&str> = cli.exchanges.iter().map(String::as_str).collect();
        registry.retain(|adapter| wanted.contains(adapter.name()));
    }
    if registry.is_empty() {
        warn!("exchange registry is empty; nothing will be collected");
    }

    let backfill_status_path = Arc::new(PathBuf::from("backfill_status.json"));
    let app_state = AppState {
        storage: storage.clone(),
        cache: cache.clone(),
        config: Arc::new(config.clone()),
        metrics: metrics.clone(),
        backfill_status_path: backfill_status_path.clone(),
        registry: registry.clone(),
    };

    let api_handle = if cli.no_api {
        None
    } else {
        Some(spawn_api(app_state, config.api.port))
    };

    let ctrl_c_cancel = cancel.clone();
    let ctrl_c_task = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_cancel.cancel();
    });

    let result = match cli.mode {
        RunMode::Live => run_live(registry, storage, &config, &metrics, cli.duration, &cancel).await,
        RunMode::Historical => run_historical(registry, storage, &config, &metrics, cli.duration, &cancel).await,
    };

    ctrl_c_task.abort();
    if let Some(handle) = api_handle {
        handle.abort();
    }

    match result {
        Ok(()) if cancel.is_cancelled() => Ok(EXIT_CANCELLED),
        Ok(()) => Ok(EXIT_CLEAN),
        Err(err) => {
            error!(error = %err, "runtime error");
            Ok(EXIT_RUNTIME_ERROR)
        }
    }
}

fn spawn_api(state: AppState, port: u16) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{port}");
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(error = %err, %addr, "failed to bind API listener");
                return;
            }
        };
        info!(%addr, "query API listening");
        let router = build_router(state);
        if let Err(err) = axum::serve(listener, router).await {
            error!(error = %err, "API server exited");
        }
    })
}

async fn run_live(
    registry: Vec<Arc<dyn Exchange>>,
    storage: Arc<Storage>,
    config: &Config,
    metrics: &Arc<Metrics>,
    duration_secs: Option<u64>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let analytics_handle = spawn_analytics_tasks(storage.clone(), config, metrics.clone(), cancel.clone());

    let scheduler = LiveScheduler::new(registry, storage, config);
    let run_duration = duration_secs.map(Duration::from_secs);
    let reports = scheduler.run(run_duration, cancel).await?;
    for report in &reports {
        metrics.record_cycle(report);
    }
    info!(cycles = reports.len(), "live scheduler stopped");

    analytics_handle.abort();
    Ok(())
}

/// Spawn the statistics engine and arbitrage scanner as background tasks
/// running alongside the live scheduler. Independent of the
/// scheduler's own tick since both read committed storage state rather
/// than a single cycle's in-memory batch.
fn spawn_analytics_tasks(
    storage: Arc<Storage>,
    config: &Config,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let stats_engine = StatisticsEngine::new(storage.clone());
    let scanner = ArbitrageScanner::new(storage.clone(), config);
    let interval = Duration::from_secs(BACKGROUND_TASK_INTERVAL_SECS);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }

            match stats_engine.refresh_due(chrono::Utc::now()) {
                Ok(summary) => info!(
                    refreshed = summary.refreshed,
                    considered = summary.considered,
                    active_zone = summary.active_zone,
                    stable_zone = summary.stable_zone,
                    "statistics refresh"
                ),
                Err(err) => warn!(error = %err, "statistics refresh failed"),
            }

            match scanner.scan(chrono::Utc::now()) {
                Ok(spreads) => {
                    metrics.record_arbitrage_scan();
                    info!(found = spreads.len(), "arbitrage scan complete");
                }
                Err(err) => warn!(error = %err, "arbitrage scan failed"),
            }

            if let Err(err) = storage.mark_stale_contracts(chrono::Utc::now(), STALE_CONTRACT_AFTER_SECS) {
                warn!(error = %err, "stale-contract sweep failed");
            }
            if let Err(err) = storage.prune_old_spreads(chrono::Utc::now(), SPREAD_MAX_AGE_DAYS) {
                warn!(error = %err, "spread pruning failed");
            }

            if cancel.is_cancelled() {
                break;
            }
        }
    })
}

async fn run_historical(
    registry: Vec<Arc<dyn Exchange>>,
    storage: Arc<Storage>,
    config: &Config,
    metrics: &Arc<Metrics>,
    duration_override_days: Option<u64>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(days) = duration_override_days {
        config.historical.days = days as u32;
    }
    let runner = BackfillRunner::new(registry, storage, &config);
    let status = runner.run(cancel).await?;
    metrics.record_backfill_run();
    info!(
        state = ?status.state,
        contracts_done = status.contracts_done,
        contracts_total = status.contracts_total,
        gaps_filled = status.gaps_filled,
        "backfill run complete"
    );
    Ok(())
}
