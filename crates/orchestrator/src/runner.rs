//! Per-rank MD step loop
//!
//! Every rank runs [`run_rank`] with its own transport. The loop is the
//! classic neighbor-list cadence: on rebuild steps particles are
//! redistributed, ghosts refilled from a fresh sort and the lists rebuilt;
//! on the steps in between the ghosts are refreshed in place so the lists
//! stay valid.

use std::time::Instant;

use kernel::CutoffPredicate;

use crate::config::SimulationConfig;
use crate::container::ParticleContainer;
use crate::decomposition::Decomposition;
use crate::error::NeighborError;
use crate::exchange::ExchangeStats;
use crate::transport::Transport;

/// State of one rank at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSummary {
    /// Rank id.
    pub rank: usize,
    /// Steps executed.
    pub steps: u64,
    /// Owned particles after the final redistribution.
    pub num_real: usize,
    /// Ghost particles after the last exchange of the loop.
    pub num_ghosts: usize,
    /// Neighbor pairs in the last built lists.
    pub num_pairs: usize,
    /// Kinetic energy of the owned particles.
    pub kinetic_energy: f64,
    /// Exchange counters summed over the run.
    pub exchange: ExchangeStats,
    /// Wall-clock seconds spent in the loop.
    pub elapsed_secs: f64,
}

/// Initialise this rank's particles and run `config.num_steps` steps.
///
/// `decomp` must be the same on every rank. All ranks take part in every
/// exchange, so an error on one rank leaves the others blocked in their next
/// collective; callers should treat any error as fatal for the whole run.
pub fn run_rank<T: Transport + ?Sized>(
    config: &SimulationConfig,
    decomp: Decomposition,
    transport: &mut T,
) -> Result<RankSummary, NeighborError> {
    let rank = transport.rank();
    let mut pc = ParticleContainer::new(decomp, rank, config.neighbor_cells);

    let created = pc.init_particles(
        config.particles_per_cell,
        config.thermal_momentum_mean,
        config.thermal_momentum_std,
        config.seed,
    )?;
    pc.build_region_mask()?;
    tracing::info!(
        "rank {}: {} grids, {} particles created",
        rank,
        pc.local_grids().count(),
        created
    );

    let predicate = CutoffPredicate::new(config.cutoff);
    let params = config.force_params();
    let mut exchange = ExchangeStats::default();
    let mut num_ghosts = 0;
    let mut num_pairs = 0;
    let start = Instant::now();

    for step in 0..config.num_steps {
        let rebuild = step % config.list_rebuild_interval == 0;
        if rebuild {
            exchange.accumulate(&pc.redistribute(transport)?);
            exchange.accumulate(&pc.fill_neighbors(transport)?);
            pc.build_neighbor_list(config.cutoff, &predicate);
        } else {
            exchange.accumulate(&pc.update_neighbors(transport)?);
        }
        num_ghosts = pc.num_ghosts();
        num_pairs = pc.num_pairs();

        pc.compute_forces(&params)?;
        pc.move_particles(config.dt);

        tracing::debug!(
            "rank {}: step {}/{}{} real={} ghosts={} pairs={}",
            rank,
            step + 1,
            config.num_steps,
            if rebuild { " (rebuild)" } else { "" },
            pc.num_real(),
            num_ghosts,
            num_pairs
        );
    }

    // Leave every particle in the grid containing it
    exchange.accumulate(&pc.redistribute(transport)?);

    let summary = RankSummary {
        rank,
        steps: config.num_steps,
        num_real: pc.num_real(),
        num_ghosts,
        num_pairs,
        kinetic_energy: pc.kinetic_energy(config.mass),
        exchange,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    tracing::info!(
        "rank {}: {} steps in {:.3}s, {} particles, KE={:.6e}",
        rank,
        summary.steps,
        summary.elapsed_secs,
        summary.num_real,
        summary.kinetic_energy
    );
    Ok(summary)
}
