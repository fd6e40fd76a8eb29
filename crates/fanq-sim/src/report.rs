//! Run report generation.

use chrono::{DateTime, Utc};
use fanq_query::StatsSnapshot;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

impl LatencyStats {
    pub fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }

        Self {
            count: histogram.len(),
            min_us: histogram.min(),
            max_us: histogram.max(),
            mean_us: histogram.mean() as u64,
            p50_us: histogram.value_at_quantile(0.50),
            p95_us: histogram.value_at_quantile(0.95),
            p99_us: histogram.value_at_quantile(0.99),
        }
    }

    /// Formats latency as a human-readable string.
    pub fn format_ms(&self) -> String {
        if self.count == 0 {
            "N/A".to_string()
        } else {
            format!(
                "p50={:.1}ms p95={:.1}ms p99={:.1}ms",
                self.p50_us as f64 / 1000.0,
                self.p95_us as f64 / 1000.0,
                self.p99_us as f64 / 1000.0
            )
        }
    }
}

/// A simulated region as configured for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSummary {
    pub name: String,
    pub queries: usize,
    pub latency_ms: u64,
    pub failure: String,
}

/// What one batch returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub iteration: usize,
    pub success: bool,
    /// Entries in the merged response
    pub entries: usize,
    /// Entries that carry an error instead of frames
    pub embedded_errors: usize,
    pub samples: usize,
    /// Submitted query ids absent from a successful response
    pub missing: Vec<String>,
    /// Batch error, when the batch failed
    pub error: Option<String>,
    pub elapsed_us: u64,
}

/// Complete run report.
#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    /// Queried window as (start, end) in epoch milliseconds
    pub window_ms: (i64, i64),
    pub total_duration: Duration,
    pub regions: Vec<RegionSummary>,
    pub batches: Vec<BatchOutcome>,
    pub latency: LatencyStats,
    pub remote_calls: u64,
    pub stats: StatsSnapshot,
}

impl Report {
    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| !b.success).count()
    }

    /// Generates a markdown report.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Fan-out Simulator Report\n\n");
        md.push_str(&format!("Generated at {}\n\n", self.generated_at.to_rfc3339()));

        md.push_str("## Configuration\n\n");
        md.push_str("| Setting | Value |\n");
        md.push_str("|---------|-------|\n");
        md.push_str(&format!("| Seed | {} |\n", self.seed));
        md.push_str(&format!("| Window | {}..{} |\n", self.window_ms.0, self.window_ms.1));
        md.push_str(&format!("| Batches | {} |\n", self.batches.len()));
        md.push('\n');

        md.push_str("### Regions\n\n");
        md.push_str("| Region | Queries | Latency | Failure mode |\n");
        md.push_str("|--------|---------|---------|--------------|\n");
        for region in &self.regions {
            md.push_str(&format!(
                "| {} | {} | {}ms | {} |\n",
                region.name, region.queries, region.latency_ms, region.failure
            ));
        }
        md.push('\n');

        md.push_str("## Batches\n\n");
        md.push_str("| # | Result | Entries | Embedded errors | Samples | Missing | Latency |\n");
        md.push_str("|---|--------|---------|-----------------|---------|---------|---------|\n");
        for batch in &self.batches {
            let result = match &batch.error {
                Some(e) => format!("failed: {}", e.replace('|', "\\|")),
                None => "ok".to_string(),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {:.1}ms |\n",
                batch.iteration,
                result,
                batch.entries,
                batch.embedded_errors,
                format_number(batch.samples as u64),
                batch.missing.len(),
                batch.elapsed_us as f64 / 1000.0
            ));
        }
        md.push('\n');

        md.push_str("### Batch Latency\n\n");
        md.push_str("| Percentile | Latency |\n");
        md.push_str("|------------|--------|\n");
        if self.latency.count > 0 {
            for (name, us) in [
                ("p50", self.latency.p50_us),
                ("p95", self.latency.p95_us),
                ("p99", self.latency.p99_us),
                ("max", self.latency.max_us),
            ] {
                md.push_str(&format!("| {} | {:.2}ms |\n", name, us as f64 / 1000.0));
            }
        } else {
            md.push_str("| N/A | No data |\n");
        }
        md.push('\n');

        md.push_str("## Executor\n\n");
        md.push_str("| Counter | Value |\n");
        md.push_str("|---------|-------|\n");
        for (name, value) in [
            ("Remote calls", self.remote_calls),
            ("Tasks spawned", self.stats.tasks_spawned),
            ("Tasks completed", self.stats.tasks_completed),
            ("Tasks aborted", self.stats.tasks_aborted),
            ("Tasks faulted", self.stats.tasks_faulted),
            ("Results emitted", self.stats.results_emitted),
            ("Fault results", self.stats.fault_results_emitted),
            ("Dropped faults", self.stats.dropped_faults),
        ] {
            md.push_str(&format!("| {} | {} |\n", name, format_number(value)));
        }
        md.push('\n');

        md.push_str("## Summary\n\n");
        md.push_str(&format!(
            "Total runtime: {:.2}s\n\n",
            self.total_duration.as_secs_f64()
        ));

        let failed = self.failed_batches();
        if failed > 0 {
            md.push_str(&format!("**{} of {} batches failed**\n", failed, self.batches.len()));
        } else if self.stats.tasks_faulted > 0 {
            md.push_str("**All batches succeeded; faulted regions were isolated**\n");
        } else {
            md.push_str("**All batches succeeded**\n");
        }

        md
    }

    /// Generates a JSON report.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Prints a summary to stdout.
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("FAN-OUT RESULTS");
        println!("{}", "=".repeat(60));

        println!(
            "\nRegions: {} | Batches: {} | Failed: {} | Duration: {:.2}s",
            self.regions.len(),
            self.batches.len(),
            self.failed_batches(),
            self.total_duration.as_secs_f64()
        );
        println!("Latency: {}", self.latency.format_ms());
        println!(
            "Tasks: {} spawned, {} completed, {} aborted, {} faulted",
            self.stats.tasks_spawned, self.stats.tasks_completed, self.stats.tasks_aborted, self.stats.tasks_faulted
        );

        for batch in &self.batches {
            match &batch.error {
                Some(e) => println!("  #{} failed: {}", batch.iteration, e),
                None if !batch.missing.is_empty() => println!(
                    "  #{} ok: {} entries, missing {}",
                    batch.iteration,
                    batch.entries,
                    batch.missing.join(", ")
                ),
                None => println!("  #{} ok: {} entries", batch.iteration, batch.entries),
            }
        }

        println!("\n{}", "=".repeat(60));
    }
}

/// Formats a number with thousand separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
