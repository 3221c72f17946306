//! Command-line MD driver
//!
//! Loads a JSON run configuration and runs the decomposed neighbor-list
//! simulation, either as threads of this process or (with the `mpi`
//! feature and `--mpi`) as one rank of an MPI job.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestrator::SimulationConfig;

#[derive(Parser, Debug)]
#[command(name = "md-runner", version, about = "Decomposed neighbor-list MD runs")]
struct Args {
    /// Path to the JSON run configuration
    config: String,

    /// Number of in-process ranks (overrides the configuration)
    #[arg(short, long)]
    ranks: Option<usize>,

    /// Number of steps (overrides the configuration)
    #[arg(short = 'n', long)]
    steps: Option<u64>,

    /// Run as one rank of an MPI job instead of in-process threads
    #[cfg(feature = "mpi")]
    #[arg(long)]
    mpi: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "md_runner=info,orchestrator=info,kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match SimulationConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(ranks) = args.ranks {
        config.num_ranks = ranks;
    }
    if let Some(steps) = args.steps {
        config.num_steps = steps;
    }

    #[cfg(feature = "mpi")]
    if args.mpi {
        match orchestrator::run_mpi(&config) {
            Ok(summary) => tracing::info!(
                "rank {} done: {} particles, KE={:.6e}",
                summary.rank,
                summary.num_real,
                summary.kinetic_energy
            ),
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    match orchestrator::run_in_process(&config) {
        Ok(summary) => {
            for rank in &summary.ranks {
                tracing::info!(
                    "rank {}: {} particles, {} ghosts, {} pairs, {:.3}s",
                    rank.rank,
                    rank.num_real,
                    rank.num_ghosts,
                    rank.num_pairs,
                    rank.elapsed_secs
                );
            }
            tracing::info!(
                "done: {} particles, KE={:.6e}, {} B exchanged",
                summary.num_real,
                summary.kinetic_energy,
                summary.exchange.sent_bytes
            );
        }
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}
