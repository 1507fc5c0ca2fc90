use std::path::PathBuf;

use aicost::cache::CacheBackend;
use aicost::keys::MAX_WINDOW_DAYS;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};

fn days_parser() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(0..=i64::from(MAX_WINDOW_DAYS))
}

#[derive(Parser, Debug)]
#[command(
    name = "aicost",
    about = "Daily AI usage and cost accounting on a key-value cache"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: platform config dir, aicost/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache backend, overriding the config file
    #[arg(long, global = true)]
    pub cache: Option<CacheBackend>,

    /// Cache file location, overriding the config file
    #[arg(long, global = true)]
    pub cache_path: Option<PathBuf>,

    /// Output format: table (default), json
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Show per-model rows under the usage-key breakdown
    #[arg(long, global = true)]
    pub breakdown: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Record a single completed AI call
    Record {
        /// Feature or entry point the call is attributed to
        #[arg(long, default_value = "")]
        usage_key: String,
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "")]
        model: String,
        /// Input (prompt) tokens
        #[arg(long)]
        input: Option<u64>,
        /// Output (completion) tokens
        #[arg(long)]
        output: Option<u64>,
        /// Total tokens; derived from input + output when omitted
        #[arg(long)]
        total: Option<u64>,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        latency_ms: i64,
        /// Mark the call as failed with this error code
        #[arg(long)]
        error: Option<String>,
        /// The response was served from a cache
        #[arg(long)]
        cache_hit: bool,
        /// Event time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Record every event of a JSON-lines file
    Ingest {
        /// One JSON usage event per line
        file: PathBuf,
    },
    /// Totals for the N days ending at --end
    Window {
        /// Last day of the window (YYYY-MM-DD); defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Window length in days
        #[arg(long, default_value = "7", value_parser = days_parser())]
        days: u32,
    },
    /// Compare a window with the equally long window before it
    Compare {
        /// Last day of the current window (YYYY-MM-DD); defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Window length in days
        #[arg(long, default_value = "7", value_parser = days_parser())]
        days: u32,
    },
    /// Estimate the cost of a call from the configured price list
    Cost {
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "")]
        model: String,
        #[arg(long)]
        input: Option<u64>,
        #[arg(long)]
        output: Option<u64>,
        #[arg(long)]
        total: Option<u64>,
    },
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record() {
        let cli = Cli::try_parse_from([
            "aicost",
            "record",
            "--usage-key",
            "chat.ask",
            "--provider",
            "openai",
            "--model",
            "gpt-4o-mini",
            "--input",
            "100",
            "--error",
            "timeout",
            "--at",
            "2025-01-10T12:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Command::Record {
                input, error, at, ..
            } => {
                assert_eq!(input, Some(100));
                assert_eq!(error.as_deref(), Some("timeout"));
                assert!(at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_compare_with_globals() {
        let cli = Cli::try_parse_from([
            "aicost", "compare", "--end", "2025-01-10", "--days", "30", "--cache", "memory",
            "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.cache, Some(CacheBackend::Memory));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Compare { days: 30, .. }));
    }

    #[test]
    fn rejects_oversized_window() {
        for cmd in ["window", "compare"] {
            assert!(Cli::try_parse_from(["aicost", cmd, "--days", "4000000000"]).is_err());
        }
        let cli = Cli::try_parse_from(["aicost", "window", "--days", "3660"]).unwrap();
        assert!(matches!(cli.command, Command::Window { days: 3660, .. }));
    }
}
