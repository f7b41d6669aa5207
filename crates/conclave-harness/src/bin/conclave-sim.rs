//! Closed group simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # One run of 500 generated operations across 5 devices
//! conclave-sim --seed 42 --devices 5 --steps 500
//!
//! # Sweep 100 consecutive seeds starting at 1000
//! conclave-sim --seed 1000 --runs 100
//! ```

use std::process::ExitCode;

use clap::Parser;
use conclave_core::ControllerConfig;
use conclave_harness::{Cluster, InvariantRegistry};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Conclave closed group simulator
#[derive(Parser, Debug)]
#[command(name = "conclave-sim")]
#[command(about = "Deterministic closed group simulation with invariant checks")]
#[command(version)]
struct Args {
    /// First seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of consecutive seeds to run
    #[arg(short, long, default_value = "1")]
    runs: u64,

    /// Devices per cluster
    #[arg(short, long, default_value = "4")]
    devices: usize,

    /// Generated operations per run
    #[arg(long, default_value = "200")]
    steps: usize,

    /// Attempts before a queued direct send is abandoned
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ControllerConfig { job_max_attempts: args.max_attempts, ..Default::default() };
    let registry = InvariantRegistry::standard();
    let mut failures = 0u64;

    for seed in args.seed..args.seed.saturating_add(args.runs) {
        let mut cluster = Cluster::with_config(seed, args.devices, config.clone());
        match cluster.run(args.steps, &registry) {
            Ok(stats) => tracing::info!(
                seed,
                applied = stats.applied,
                rejected = stats.rejected,
                skipped = stats.skipped,
                delivered = stats.delivered,
                abandoned = stats.abandoned,
                "run passed"
            ),
            Err(failure) => {
                tracing::error!(seed, %failure, "invariant violated");
                failures += 1;
            },
        }
    }

    if failures == 0 {
        tracing::info!(runs = args.runs, "all runs passed");
        ExitCode::SUCCESS
    } else {
        tracing::error!(failures, runs = args.runs, "runs failed");
        ExitCode::FAILURE
    }
}
