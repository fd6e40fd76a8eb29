//! CLI entry point for the fan-out simulator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanq_sim::{run_batch, SimConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fanq-sim")]
#[command(about = "Drive the region fan-out executor against a simulated metrics API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print the report as JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Also write a markdown report to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario described by a TOML file
    Run {
        /// Scenario file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the number of batches
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Override the seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Override the batch deadline in seconds (0 = none)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run the built-in three-region scenario
    Demo {
        /// Number of batches
        #[arg(short, long, default_value = "1")]
        iterations: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Run {
            config,
            iterations,
            seed,
            timeout,
        } => {
            let mut loaded = SimConfig::from_file(&config)
                .with_context(|| format!("loading scenario {}", config.display()))?;
            if let Some(iterations) = iterations {
                loaded.iterations = iterations;
            }
            if let Some(seed) = seed {
                loaded.seed = seed;
            }
            if let Some(secs) = timeout {
                loaded.engine = loaded.engine.with_query_timeout_secs(secs);
            }
            info!("Running scenario from {}", config.display());
            loaded
        }
        Commands::Demo { iterations } => {
            info!("Running built-in demo scenario");
            SimConfig {
                iterations,
                ..SimConfig::demo()
            }
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling in-flight batch");
                cancel.cancel();
            }
        });
    }

    let report = run_batch(&config, cancel).await?;

    if cli.json {
        println!("{}", report.to_json());
    } else {
        report.print_summary();
    }

    if let Some(path) = &cli.output {
        std::fs::write(path, report.to_markdown())
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Markdown report saved to: {}", path.display());
    }

    if report.failed_batches() > 0 {
        std::process::exit(1);
    }

    Ok(())
}
