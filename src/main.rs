mod cli;
mod output;

use std::sync::Arc;

use aicost::cache::open_cache;
use aicost::config::load_config;
use aicost::cost::PricingResolver;
use aicost::ingest::parse_jsonl_file;
use aicost::types::{TokenUsage, UsageEvent};
use aicost::{UsageRecorder, WindowReader};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, OutputFormat};

fn init_logging() {
    let filter = EnvFilter::try_from_env("AICOST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());
    let backend = cli.cache.unwrap_or(config.cache.backend);
    let cache_path = cli.cache_path.clone().or_else(|| config.cache.path.clone());
    let cache = open_cache(backend, cache_path).context("Failed to open cache")?;
    let pricing = Arc::new(config.pricing.clone());
    let today = config.day_boundary.today();

    match cli.command {
        Command::Record {
            usage_key,
            provider,
            model,
            input,
            output,
            total,
            latency_ms,
            error,
            cache_hit,
            at,
        } => {
            let event = UsageEvent {
                usage_key,
                provider,
                model,
                usage: TokenUsage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: total,
                },
                latency_ms,
                ok: error.is_none(),
                error_code: error,
                cache_hit,
                timestamp: at,
            };

            let unpriced = pricing.unpriced(std::slice::from_ref(&event));
            if !unpriced.is_empty() {
                eprintln!("No pricing data for: {}", unpriced.join(", "));
            }

            let recorder = UsageRecorder::new(cache, pricing, config.recorder_settings());
            if !recorder.settings().enabled {
                warn!("recording is disabled; event dropped");
            }
            recorder.record(&event).context("Failed to record event")?;
        }
        Command::Ingest { file } => {
            let parsed = parse_jsonl_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if parsed.skipped > 0 {
                eprintln!("Skipped {} malformed line(s).", parsed.skipped);
            }

            let unpriced = pricing.unpriced(&parsed.events);
            if !unpriced.is_empty() {
                eprintln!("No pricing data for: {}", unpriced.join(", "));
            }

            let recorder = UsageRecorder::new(cache, pricing, config.recorder_settings());
            if !recorder.settings().enabled {
                warn!("recording is disabled; events dropped");
            }
            let n = recorder
                .record_all(&parsed.events)
                .context("Failed to record events")?;
            info!(recorded = n, skipped = parsed.skipped, file = %file.display(), "ingest finished");
            eprintln!("Recorded {n} event(s).");
        }
        Command::Window { end, days } => {
            let reader = WindowReader::new(cache);
            let report = reader
                .load_window(end.unwrap_or(today), days)
                .context("Failed to load window")?;
            match cli.format {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Table => output::print_window_table(&report, cli.breakdown),
            }
        }
        Command::Compare { end, days } => {
            let reader = WindowReader::new(cache);
            let cmp = reader
                .load_with_previous_and_delta(end.unwrap_or(today), days)
                .context("Failed to load comparison")?;
            match cli.format {
                OutputFormat::Json => output::print_json(&cmp)?,
                OutputFormat::Table => output::print_compare_table(&cmp),
            }
        }
        Command::Cost {
            provider,
            model,
            input,
            output,
            total,
        } => {
            let usage = TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: total,
            };
            let cost = pricing.calculate_eur(&provider, &model, &usage);
            match cli.format {
                OutputFormat::Json => output::print_json(&serde_json::json!({
                    "provider": provider,
                    "model": model,
                    "cost_eur": cost,
                }))?,
                OutputFormat::Table => println!("{}", output::format_cost(cost)),
            }
        }
    }

    Ok(())
}
