//! Grid-local particle kernels.
//!
//! Everything in this crate operates on the particles of a single grid or
//! tile and knows nothing about ranks or message passing. The orchestrator
//! crate composes these pieces into the decomposed ghost exchange.
//!
//! # Modules
//! - [`geometry`] -- Integer cell boxes, the problem domain and periodic shifts.
//! - [`particle`] -- Fixed-layout particle record and the real + ghost tile store.
//! - [`region`] -- Region-code masks, particle classification and sort-by-region.
//! - [`neighbor`] -- Cell-binned cutoff neighbor lists with a pair predicate.
//! - [`force`] -- Softened short-range pair force over a neighbor list.
//! - [`integrate`] -- Euler update with reflecting or periodic walls.

#![warn(missing_docs)]

pub mod force;
pub mod geometry;
pub mod integrate;
pub mod neighbor;
pub mod particle;
pub mod region;

pub use force::{compute_forces, pair_acceleration, ForceParams};
pub use geometry::{Geometry, IndexType, IntBox, IntVect, SPACEDIM};
pub use integrate::move_particles;
pub use neighbor::{CutoffPredicate, NeighborList, Neighbors, PairPredicate};
pub use particle::{Particle, ParticleIdAllocator, ParticleTile};
pub use region::{classify, sort_by_region, OutsideMaskError, RegionMask, RegionRuns, INTERIOR};
