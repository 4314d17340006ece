//! Command-line surface: `collector [--mode live|historical]
//! [--interval SECS] [--duration SECS] [--exchanges CSV]
//! [--parallel|--sequential]`.
//!
//! A flag-driven single command rather than a subcommand tree, since this
//! system has exactly two run modes.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Live,
    Historical,
}

#[derive(Parser, Debug)]
#[command(name = "collector", version, about = "Multi-exchange perpetual funding rate observatory")]
pub struct Cli {
    /// Which scheduler to run.
    #[arg(long, value_enum, default_value = "live")]
    pub mode: RunMode,

    /// Overrides `collection.tick_seconds` for this run.
    #[arg(long)]
    pub interval: Option<u64>,

    /// Stop after this many seconds (live mode) or treat as the backfill
    /// window in days (historical mode, overrides `historical.days`).
    #[arg(long)]
    pub duration: Option<u64>,

    /// Comma-separated venue names to restrict the registry to, e.g.
    /// "binance,okx,bybit". Defaults to every configured, enabled venue.
    #[arg(long, value_delimiter = ',')]
    pub exchanges: Vec<String>,

    /// Force parallel dispatch for this run, overriding `collection.mode`.
    #[arg(long, conflicts_with = "sequential")]
    pub parallel: bool,

    /// Force staggered sequential dispatch for this run, overriding
    /// `collection.mode`.
    #[arg(long, conflicts_with = "parallel")]
    pub sequential: bool,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "observatory.toml")]
    pub config: String,

    /// Port override for the query API's HTTP listener.
    #[arg(long)]
    pub port: Option<u16>,

    /// Skip starting the HTTP API alongside the scheduler.
    #[arg(long)]
    pub no_api: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_live_mode_with_empty_exchange_filter() {
        let cli = Cli::parse_from(["collector"]);
        assert_eq!(cli.mode, RunMode::Live);
        assert!(cli.exchanges.is_empty());
        assert!(!cli.parallel && !cli.sequential);
    }

    #[test]
    fn parses_historical_mode_with_duration_and_exchange_filter() {
        let cli = Cli::parse_from([
            "collector",
            "--mode",
            "historical",
            "--duration",
            "14",
            "--exchanges",
            "binance,okx",
        ]);
        assert_eq!(cli.mode, RunMode::Historical);
        assert_eq!(cli.duration, Some(14));
        assert_eq!(cli.exchanges, vec!["binance".to_string(), "okx".to_string()]);
    }

    #[test]
    fn parallel_and_sequential_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["collector", "--parallel", "--sequential"]);
        assert!(result.is_err());
    }
}
