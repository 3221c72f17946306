//! Orchestration Layer
//!
//! Composes the grid-local kernels into a decomposed, multi-rank particle
//! simulation:
//! - Domain decomposition into grids and their owner ranks
//! - Per-grid region masks and neighbor tables over the ghost shell
//! - Ghost exchange (same-rank copies plus packed cross-rank messages)
//! - Redistribution of particles that changed grid
//! - The MD step loop, run in-process over channels or over MPI

#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod decomposition;
pub mod distributed;
pub mod error;
pub mod exchange;
#[cfg(feature = "mpi")]
pub mod mpi_transport;
pub mod pipeline;
pub mod region_mask;
pub mod runner;
pub mod transport;
pub mod wire;

pub use config::SimulationConfig;
pub use container::{ParticleContainer, TileKey};
pub use decomposition::{BoxArray, Decomposition, DistributionMapping};
pub use distributed::{run_in_process, RunSummary};
pub use error::NeighborError;
pub use exchange::ExchangeStats;
pub use pipeline::{ExchangePipeline, ExchangeStage};
pub use region_mask::{GridRegions, NeighborTarget, RegionMasks};
pub use runner::{run_rank, RankSummary};
pub use transport::{ChannelTransport, LocalTransport, Transport, TransportError};
pub use wire::{GhostGroup, GhostMessage, WireError};

#[cfg(feature = "mpi")]
pub use distributed::run_mpi;
#[cfg(feature = "mpi")]
pub use mpi_transport::MpiTransport;

/// Run a simulation described by a configuration file
///
/// Loads and validates the JSON configuration, then runs
/// `num_ranks` ranks as threads of this process.
///
/// # Arguments
/// * `config_path` - Path to the JSON configuration file
/// * `num_ranks` - Overrides the configured rank count when set
pub fn run_from_file(config_path: &str, num_ranks: Option<usize>) -> Result<RunSummary, NeighborError> {
    let mut config = SimulationConfig::load(config_path).map_err(NeighborError::Config)?;
    if let Some(n) = num_ranks {
        config.num_ranks = n;
    }
    run_in_process(&config)
}
