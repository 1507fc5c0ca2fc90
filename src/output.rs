use std::collections::BTreeMap;

use aicost::types::Aggregate;
use aicost::window::{Delta, WindowComparison, WindowReport};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use serde::Serialize;

fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(c) if c != 0.0 && c.abs() < 0.01 => format!("€{:.6}", c),
        Some(c) => format!("€{:.2}", c),
        None => "N/A".to_string(),
    }
}

fn format_pct(pct: Option<f64>) -> String {
    match pct {
        Some(p) => format!("{:+.1}%", p),
        None => "n/a".to_string(),
    }
}

const WINDOW_HEADER: &[&str] = &[
    "Usage Key",
    "Requests",
    "Input",
    "Output",
    "Total",
    "Cost",
    "Errors",
    "Cache Hits",
    "Avg Latency",
];

fn aggregate_row(label: &str, a: &Aggregate) -> Vec<Cell> {
    vec![
        Cell::new(label),
        Cell::new(a.requests),
        Cell::new(format_tokens(a.input_tokens)),
        Cell::new(format_tokens(a.output_tokens)),
        Cell::new(format_tokens(a.total_tokens)),
        Cell::new(format_cost(Some(a.cost_eur))),
        Cell::new(a.errors),
        Cell::new(a.cache_hits),
        Cell::new(format!("{:.0}ms", a.avg_latency_ms())),
    ]
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_window_table(report: &WindowReport, breakdown: bool) {
    println!(
        "{} .. {} ({} day{})",
        report.start_day,
        report.end_day,
        report.days,
        if report.days == 1 { "" } else { "s" }
    );

    let mut table = new_table();
    table.set_header(WINDOW_HEADER.iter().map(|h| Cell::new(*h)));

    for (key, agg) in &report.data.by_usage_key {
        table.add_row(aggregate_row(key, agg));
    }

    if breakdown {
        add_breakdown(&mut table, &report.data.by_model);
    }

    table.add_row(aggregate_row("TOTAL", &report.data.totals));

    println!("{table}");
}

fn add_breakdown(table: &mut Table, by_model: &BTreeMap<String, Aggregate>) {
    for (model, agg) in by_model {
        table.add_row(aggregate_row(&format!("  {model}"), agg));
    }
}

fn delta_row(label: &str, d: &Delta, fmt: impl Fn(f64) -> String) -> Vec<Cell> {
    vec![
        Cell::new(label),
        Cell::new(fmt(d.previous)),
        Cell::new(fmt(d.current)),
        Cell::new(fmt(d.abs)),
        Cell::new(format_pct(d.pct)),
    ]
}

pub fn print_compare_table(cmp: &WindowComparison) {
    println!(
        "current {} .. {} vs previous {} .. {}",
        cmp.current.start_day, cmp.current.end_day, cmp.previous.start_day, cmp.previous.end_day
    );

    let d = &cmp.delta_totals;
    let count = |v: f64| format!("{v:.0}");
    let mut table = new_table();
    table.set_header(["Metric", "Previous", "Current", "Change", "Change %"]);
    table.add_row(delta_row("Requests", &d.requests, count));
    table.add_row(delta_row("Total tokens", &d.total_tokens, count));
    table.add_row(delta_row("Cost", &d.cost_eur, |v| format_cost(Some(v))));
    table.add_row(delta_row("Errors", &d.errors, count));
    table.add_row(delta_row("Avg latency", &d.avg_latency_ms, |v| {
        format!("{v:.0}ms")
    }));

    println!("{table}");
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
