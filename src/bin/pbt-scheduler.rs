//! pbt-scheduler CLI
//!
//! Runs one tuning session from a worker topology and an optional TOML
//! config file, printing a run report when it finishes.

use anyhow::Context;
use clap::Parser;
use pbt_scheduler::config::SchedulerConfig;
use pbt_scheduler::logging::init_tracing;
use pbt_scheduler::trial::{Hyperparameter, ModelType, TrialId, TrialState};
use pbt_scheduler::tuner::Tuner;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pbt-scheduler")]
#[command(about = "Distributed trial scheduler for population-based hyperparameter optimization")]
#[command(version)]
struct Cli {
    /// TOML config file. Overrides every other flag when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of CPU workers.
    #[arg(long, default_value_t = 2)]
    cpu_workers: usize,

    /// Number of GPU workers.
    #[arg(long, default_value_t = 1)]
    gpu_workers: usize,

    /// Population size.
    #[arg(long, default_value_t = 8)]
    population: usize,

    /// Per-trial iteration budget.
    #[arg(long, default_value_t = 100)]
    stop_iteration: u64,

    /// Iterations per phase.
    #[arg(long, default_value_t = 10)]
    phase_iteration: u64,

    /// RNG seed, for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the packaged worker logs to this path after the run.
    #[arg(long)]
    log_archive: Option<PathBuf>,
}

fn random_population(count: usize, stop_iteration: u64, seed: u64) -> Vec<TrialState> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let hyperparameter = Hyperparameter {
                lr: rng.gen_range(0.001..0.1),
                momentum: rng.gen_range(0.8..0.99),
                batch_size: 32,
                model_type: ModelType::Resnet18,
            };
            TrialState::new(TrialId(i as u64), hyperparameter, stop_iteration)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            SchedulerConfig::from_toml_str(&contents).map_err(anyhow::Error::msg)?
        }
        None => SchedulerConfig {
            stop_iteration: cli.stop_iteration,
            phase_iteration: cli.phase_iteration,
            num_cpu_workers: cli.cpu_workers,
            num_gpu_workers: cli.gpu_workers,
            population_size: cli.population,
            rng_seed: cli.seed,
            ..Default::default()
        },
    };

    let seed = config.rng_seed.unwrap_or(0);
    let population = random_population(config.population_size, config.stop_iteration, seed);

    info!(
        population = population.len(),
        cpu_workers = config.num_cpu_workers,
        gpu_workers = config.num_gpu_workers,
        "starting tuning run"
    );

    let tuner = Arc::new(Tuner::new(config, population)?);
    let report = tuner.run().await?;

    println!(
        "run finished: {}/{} trials completed",
        report.completed, report.total
    );

    if let Some(path) = cli.log_archive {
        let written = tuner.write_zipped_log(&path).await?;
        println!("worker logs archived to {}", written.display());
    }

    Ok(())
}
