//! Batch construction and execution against the simulated API.

use crate::backend::SimBackend;
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::report::{BatchOutcome, LatencyStats, RegionSummary, Report};
use fanq_query::{ExecutionContext, FanOutExecutor, MetricQuery, Statistic};
use hdrhistogram::Histogram;
use rand::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STATISTICS: [Statistic; 4] = [
    Statistic::Average,
    Statistic::Maximum,
    Statistic::Minimum,
    Statistic::SampleCount,
];

const METRICS: [(&str, &str, &str); 4] = [
    ("AWS/EC2", "CPUUtilization", "InstanceId"),
    ("AWS/EC2", "NetworkIn", "InstanceId"),
    ("AWS/RDS", "DatabaseConnections", "DBInstanceIdentifier"),
    ("AWS/Lambda", "Duration", "FunctionName"),
];

/// Start of a window of `range_secs` ending at `end_ms`, clamped to the
/// representable range.
fn window_start(range_secs: u64, end_ms: i64) -> i64 {
    let range_ms = i64::try_from(range_secs).unwrap_or(i64::MAX).saturating_mul(1000);
    end_ms.saturating_sub(range_ms)
}

/// Build one batch from the configuration.
///
/// Query ids are `<region>-<n>`; every query shares the window ending at
/// `end_ms`.
pub fn build_batch(config: &SimConfig, end_ms: i64) -> Result<Vec<MetricQuery>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start_ms = window_start(config.range_secs, end_ms);

    let mut queries = Vec::with_capacity(config.query_count());
    for region in &config.regions {
        for n in 0..region.queries {
            let (namespace, metric, dimension) = METRICS[rng.gen_range(0..METRICS.len())];
            let statistic = STATISTICS[rng.gen_range(0..STATISTICS.len())];
            let resource = format!("{}-{:06x}", dimension.to_lowercase(), rng.gen::<u32>() & 0xff_ffff);

            let query = MetricQuery::builder(format!("{}-{}", region.name, n))
                .region(region.name.as_str())
                .time_range(start_ms, end_ms)
                .metric(namespace, metric)
                .dimension(dimension, resource)
                .statistic(statistic)
                .period_secs(config.period_secs)
                .build()?;
            queries.push(query);
        }
    }

    Ok(queries)
}

/// Run `config.iterations` batches and report on them.
///
/// Batch errors are recorded in the report, not returned; only an invalid
/// configuration fails the run.
pub async fn run_batch(config: &SimConfig, cancel: CancellationToken) -> Result<Report> {
    config.validate()?;

    let backend = Arc::new(SimBackend::new(&config.regions, config.seed));
    let executor = FanOutExecutor::with_config(Arc::clone(&backend), config.engine.clone());

    let mut ctx = ExecutionContext::new(1, "fanq-sim");
    if let Some(region) = &config.default_region {
        ctx = ctx.with_default_region(region.as_str());
    }

    let end_ms = config
        .end_ms
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let queries = build_batch(config, end_ms)?;

    info!(
        regions = config.regions.len(),
        queries = queries.len(),
        iterations = config.iterations,
        "Starting simulated batches"
    );

    let mut histogram =
        Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).map_err(|e| SimError::Histogram(e.to_string()))?;
    let mut batches = Vec::with_capacity(config.iterations);
    let started = Instant::now();

    for iteration in 0..config.iterations {
        if cancel.is_cancelled() {
            warn!(completed = iteration, "Run cancelled");
            break;
        }

        let batch_start = Instant::now();
        let outcome = executor.execute(&ctx, queries.clone(), cancel.clone()).await;
        let elapsed = batch_start.elapsed();
        let _ = histogram.record(elapsed.as_micros() as u64);

        let outcome = match outcome {
            Ok(response) => {
                let mut missing: Vec<String> = queries
                    .iter()
                    .filter(|q| response.get(q.id.as_str()).is_none())
                    .map(|q| q.id.to_string())
                    .collect();
                missing.sort();
                BatchOutcome {
                    iteration,
                    success: true,
                    entries: response.len(),
                    embedded_errors: response.error_count(),
                    samples: response.responses.values().map(|r| r.sample_count()).sum(),
                    missing,
                    error: None,
                    elapsed_us: elapsed.as_micros() as u64,
                }
            }
            Err(e) => {
                warn!(iteration, error = %e, "Batch failed");
                BatchOutcome {
                    iteration,
                    success: false,
                    entries: 0,
                    embedded_errors: 0,
                    samples: 0,
                    missing: Vec::new(),
                    error: Some(e.to_string()),
                    elapsed_us: elapsed.as_micros() as u64,
                }
            }
        };
        batches.push(outcome);
    }

    Ok(Report {
        generated_at: chrono::Utc::now(),
        seed: config.seed,
        window_ms: (window_start(config.range_secs, end_ms), end_ms),
        total_duration: started.elapsed(),
        regions: config
            .regions
            .iter()
            .map(|r| RegionSummary {
                name: r.name.clone(),
                queries: r.queries,
                latency_ms: r.latency_ms,
                failure: r.failure.to_string(),
            })
            .collect(),
        batches,
        latency: LatencyStats::from_histogram(&histogram),
        remote_calls: backend.call_count(),
        stats: executor.stats(),
    })
}
