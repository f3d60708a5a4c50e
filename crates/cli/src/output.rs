// Output formatting for CLI

use methodpool::pool::{BatchOutcome, PoolStats};
use serde::Serialize;

#[derive(Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    pool: &'a str,
    outcome: &'a BatchOutcome,
    stats: &'a PoolStats,
}

/// Print the result of a batch run
pub fn print_report(
    format: OutputFormat,
    pool: &str,
    outcome: &BatchOutcome,
    stats: &PoolStats,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let report = Report {
                pool,
                outcome,
                stats,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            print_field("Pool", pool);
            print_field("Status", &outcome.status.to_string());
            print_field("Dispatches", &outcome.total.to_string());
            print_field("Completed", &outcome.completed.to_string());
            print_field("Failed", &outcome.failed.to_string());
            print_field("Cancelled", &outcome.cancelled.to_string());
            print_field("Workers", &stats.pool_size.to_string());
            print_field("Largest", &stats.largest.to_string());
            print_field("Rejected", &stats.rejected.to_string());
        }
    }
    Ok(())
}

/// Print a simple key-value pair for text output
fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}
