//! Errors surfaced by region-mask construction and the ghost exchange.
//!
//! Every variant is fatal for the exchange that raised it: the driver logs the
//! message and stops. They fall into three groups: configuration
//! preconditions, buffer-size limits, and protocol violations between ranks.

use std::fmt;

use kernel::{IntVect, OutsideMaskError};

use crate::transport::TransportError;
use crate::wire::WireError;

/// Failure of a region-mask, exchange or redistribution operation.
#[derive(Debug)]
pub enum NeighborError {
    /// The ghost shell is wider than half a grid along some axis.
    ShellTooDeep {
        /// Offending grid.
        grid: usize,
        /// Requested shell depth in cells.
        ncells: i32,
        /// Grid extent in cells.
        extent: IntVect,
    },
    /// A grid box is not cell-centered.
    NotCellCentered {
        /// Offending grid.
        grid: usize,
    },
    /// A particle's cell is not covered by its grid's region mask.
    OutsideMask {
        /// Grid the particle is stored in.
        grid: usize,
        /// Details of the lookup.
        source: OutsideMaskError,
    },
    /// A send buffer exceeds what the transport can move in one transfer.
    MessageTooLarge {
        /// Destination rank.
        dst_rank: usize,
        /// Encoded size.
        bytes: usize,
        /// Transport limit.
        limit: usize,
    },
    /// A delivered group names a different destination rank.
    RankMismatch {
        /// Rank the message came from.
        src_rank: usize,
        /// This rank.
        expected: usize,
        /// Rank written in the group header.
        found: usize,
    },
    /// A delivered group names a grid this rank does not own.
    UnknownGrid {
        /// Rank the message came from.
        src_rank: usize,
        /// Grid written in the group header.
        grid: usize,
    },
    /// `update_neighbors` was called before any sort of this grid.
    MissingSortRuns {
        /// Offending grid.
        grid: usize,
    },
    /// Real particles were added or removed since the last sort.
    StaleSortRuns {
        /// Offending grid.
        grid: usize,
        /// Real particle count when the runs were computed.
        sorted: usize,
        /// Real particle count now.
        now: usize,
    },
    /// A particle belongs to a grid another rank owns.
    GridNotLocal {
        /// Grid containing the particle.
        grid: usize,
        /// This rank.
        rank: usize,
    },
    /// The decomposition assigns a grid to a rank the transport does not have.
    RankOutOfRange {
        /// Owner named by the distribution mapping.
        dst_rank: usize,
        /// Ranks in the transport.
        num_ranks: usize,
    },
    /// Forces were requested without a neighbor list matching the tile.
    NeighborListOutOfDate {
        /// Offending grid.
        grid: usize,
    },
    /// A particle left the problem domain along a non-periodic axis.
    ParticleOutsideDomain {
        /// `(cpu, id)` of the particle.
        particle: (u32, u64),
        /// Its position.
        pos: [f64; 3],
    },
    /// A received message could not be decoded.
    Wire {
        /// Rank the message came from.
        src_rank: usize,
        /// Decoding failure.
        source: WireError,
    },
    /// The transport failed.
    Transport(TransportError),
    /// A rank thread panicked.
    RankPanicked {
        /// Rank whose thread died.
        rank: usize,
    },
    /// Invalid configuration.
    Config(String),
}

impl fmt::Display for NeighborError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeighborError::ShellTooDeep { grid, ncells, extent } => write!(
                f,
                "grid {grid}: shell depth {ncells} exceeds half of a {extent:?} cell grid"
            ),
            NeighborError::NotCellCentered { grid } => write!(f, "grid {grid} is not cell-centered"),
            NeighborError::OutsideMask { grid, source } => write!(f, "grid {grid}: {source}"),
            NeighborError::MessageTooLarge { dst_rank, bytes, limit } => write!(
                f,
                "ghost message to rank {dst_rank} is {bytes} bytes, transport limit is {limit}"
            ),
            NeighborError::RankMismatch {
                src_rank,
                expected,
                found,
            } => write!(
                f,
                "message from rank {src_rank} holds a group for rank {found}, this is rank {expected}"
            ),
            NeighborError::UnknownGrid { src_rank, grid } => {
                write!(f, "message from rank {src_rank} targets grid {grid}, not owned here")
            }
            NeighborError::MissingSortRuns { grid } => {
                write!(f, "grid {grid}: update_neighbors called before fill_neighbors")
            }
            NeighborError::StaleSortRuns { grid, sorted, now } => write!(
                f,
                "grid {grid}: sorted with {sorted} real particles, now has {now}; call fill_neighbors"
            ),
            NeighborError::GridNotLocal { grid, rank } => write!(f, "grid {grid} is not owned by rank {rank}"),
            NeighborError::RankOutOfRange { dst_rank, num_ranks } => write!(
                f,
                "decomposition routes particles to rank {dst_rank}, transport has {num_ranks} ranks"
            ),
            NeighborError::NeighborListOutOfDate { grid } => {
                write!(f, "grid {grid}: neighbor list missing or built for a different tile layout")
            }
            NeighborError::ParticleOutsideDomain { particle, pos } => {
                write!(f, "particle {particle:?} at {pos:?} is outside the domain")
            }
            NeighborError::Wire { src_rank, source } => write!(f, "message from rank {src_rank}: {source}"),
            NeighborError::Transport(e) => write!(f, "transport: {e}"),
            NeighborError::RankPanicked { rank } => write!(f, "rank {rank} panicked"),
            NeighborError::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for NeighborError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NeighborError::OutsideMask { source, .. } => Some(source),
            NeighborError::Wire { source, .. } => Some(source),
            NeighborError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for NeighborError {
    fn from(e: TransportError) -> Self {
        NeighborError::Transport(e)
    }
}
