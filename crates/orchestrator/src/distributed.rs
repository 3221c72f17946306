//! Multi-rank execution of the MD driver.
//!
//! [`run_in_process`] runs every rank as a thread of this process, each with
//! its endpoint of a [`ChannelTransport`] cluster. With the `mpi` feature,
//! [`run_mpi`] runs this process as one rank of an MPI job instead.

use std::thread;

use crate::config::SimulationConfig;
use crate::error::NeighborError;
use crate::exchange::ExchangeStats;
use crate::runner::{run_rank, RankSummary};
use crate::transport::ChannelTransport;

/// Result of an in-process run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Per-rank results, indexed by rank.
    pub ranks: Vec<RankSummary>,
    /// Owned particles over all ranks.
    pub num_real: usize,
    /// Ghost particles over all ranks after the last exchange.
    pub num_ghosts: usize,
    /// Listed neighbor pairs over all ranks.
    pub num_pairs: usize,
    /// Total kinetic energy.
    pub kinetic_energy: f64,
    /// Exchange counters over all ranks.
    pub exchange: ExchangeStats,
}

impl RunSummary {
    fn from_ranks(ranks: Vec<RankSummary>) -> Self {
        let mut exchange = ExchangeStats::default();
        for r in &ranks {
            exchange.accumulate(&r.exchange);
        }
        Self {
            num_real: ranks.iter().map(|r| r.num_real).sum(),
            num_ghosts: ranks.iter().map(|r| r.num_ghosts).sum(),
            num_pairs: ranks.iter().map(|r| r.num_pairs).sum(),
            kinetic_energy: ranks.iter().map(|r| r.kinetic_energy).sum(),
            exchange,
            ranks,
        }
    }
}

/// Run `config.num_ranks` ranks as threads and gather their summaries.
///
/// All ranks share one decomposition, dealt round-robin. The first rank
/// error (in rank order) is returned.
pub fn run_in_process(config: &SimulationConfig) -> Result<RunSummary, NeighborError> {
    config.validate().map_err(NeighborError::Config)?;
    let n = config.num_ranks;
    let decomp = config.decomposition(n);

    tracing::info!(
        "{}: {} grids over {} in-process ranks, {} steps",
        config.name,
        decomp.grids().len(),
        n,
        config.num_steps
    );

    let handles: Vec<_> = ChannelTransport::cluster(n)
        .into_iter()
        .map(|mut transport| {
            let config = config.clone();
            let decomp = decomp.clone();
            thread::spawn(move || run_rank(&config, decomp, &mut transport))
        })
        .collect();

    let mut ranks = Vec::with_capacity(n);
    let mut first_error = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(summary)) => ranks.push(summary),
            Ok(Err(e)) => {
                tracing::warn!("rank {} failed: {}", rank, e);
                first_error.get_or_insert(e);
            }
            Err(_) => {
                first_error.get_or_insert(NeighborError::RankPanicked { rank });
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let summary = RunSummary::from_ranks(ranks);
    tracing::info!(
        "{}: {} particles, {} ghosts, {} pairs, KE={:.6e}, {} particles sent",
        config.name,
        summary.num_real,
        summary.num_ghosts,
        summary.num_pairs,
        summary.kinetic_energy,
        summary.exchange.sent_particles
    );
    Ok(summary)
}

/// Run this process as one rank of the MPI world.
///
/// `config.num_ranks` is ignored; the world size decides.
#[cfg(feature = "mpi")]
pub fn run_mpi(config: &SimulationConfig) -> Result<RankSummary, NeighborError> {
    use mpi::traits::Communicator;

    use crate::mpi_transport::MpiTransport;

    config.validate().map_err(NeighborError::Config)?;
    let universe = mpi::initialize().ok_or_else(|| NeighborError::Config("MPI was already initialized".to_string()))?;
    let world = universe.world();
    let n = world.size() as usize;
    let decomp = config.decomposition(n);
    if world.rank() == 0 {
        tracing::info!(
            "{}: {} grids over {} MPI ranks, {} steps",
            config.name,
            decomp.grids().len(),
            n,
            config.num_steps
        );
    }
    let mut transport = MpiTransport::new(world);
    run_rank(config, decomp, &mut transport)
}
