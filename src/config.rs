//! Configuration record and loader.
//!
//! A committed TOML file (`observatory.toml` by default) merged with
//! environment overrides via the `config` crate. Database credentials are
//! read from the process environment only and are never accepted from the
//! file, so the committed file never carries secrets.

use crate::error::ObservatoryError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_true() -> bool {
    true
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub mode: CollectionMode,
    pub tick_seconds: u64,
    /// Offsets (seconds) within the tick for `Sequential` mode, one per
    /// enabled exchange in registry order.
    #[serde(default)]
    pub schedule: Vec<u64>,
    pub max_cycle_duration_seconds: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            mode: CollectionMode::Parallel,
            tick_seconds: 30,
            schedule: Vec::new(),
            max_cycle_duration_seconds: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalConfig {
    pub days: u32,
    pub max_retries: u32,
    pub base_backoff_seconds: u64,
    pub lock_ttl_seconds: u64,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            days: 30,
            max_retries: 5,
            base_backoff_seconds: 1,
            lock_ttl_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub ttl_overrides_seconds: HashMap<String, u64>,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_overrides_seconds: HashMap::new(),
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageConfig {
    pub min_apr_spread: f64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_apr_spread: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeConfig>,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub historical: HistoricalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    /// Never read from the TOML file: populated from `DATABASE_DSN`/
    /// `DATABASE_PATH` at load time.
    #[serde(skip)]
    pub database_dsn: String,
}

impl Default for CollectionMode {
    fn default() -> Self {
        CollectionMode::Parallel
    }
}

impl Config {
    /// Load from `path` (if present) merged with environment overrides.
    /// Falls back to all-default configuration (every known exchange
    /// adapter enabled with default rate limits) when no file is given.
    pub fn load(path: Option<&str>) -> Result<Self, ObservatoryError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OBSERVATORY")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| ObservatoryError::Config(e.to_string()))?;

        let mut cfg: Config = raw
            .try_deserialize()
            .map_err(|e| ObservatoryError::Config(e.to_string()))?;

        cfg.database_dsn = std::env::var("DATABASE_DSN")
            .or_else(|_| std::env::var("DATABASE_PATH"))
            .unwrap_or_else(|_| "./observatory.db".to_string());

        if cfg.exchanges.is_empty() {
            cfg.exchanges = crate::exchanges::default_exchange_names()
                .into_iter()
                .map(|name| (name.to_string(), ExchangeConfig::default()))
                .collect();
        }

        Ok(cfg)
    }

    pub fn max_cycle_duration(&self) -> Duration {
        Duration::from_secs(self.collection.max_cycle_duration_seconds)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.collection.tick_seconds)
    }

    pub fn cache_ttl(&self, endpoint_class: &str, default_secs: u64) -> Duration {
        Duration::from_secs(
            self.cache
                .ttl_overrides_seconds
                .get(endpoint_class)
                .copied()
                .unwrap_or(default_secs),
        )
    }
}
