//! Rank-local particle storage over the grids of a decomposition.

use std::collections::BTreeMap;

use kernel::{
    ForceParams, IntBox, NeighborList, Neighbors, PairPredicate, Particle, ParticleIdAllocator, ParticleTile,
    RegionRuns,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::decomposition::Decomposition;
use crate::error::NeighborError;
use crate::region_mask::RegionMasks;

/// Address of a particle tile: one grid, one tile within it.
///
/// Grids are not split into tiles yet, so `tile` is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    /// Grid id.
    pub grid: usize,
    /// Tile index within the grid.
    pub tile: usize,
}

impl TileKey {
    /// The single tile of `grid`.
    pub fn grid(grid: usize) -> Self {
        Self { grid, tile: 0 }
    }
}

/// A tile's neighbor list and the tile length it was built against.
#[derive(Debug, Clone)]
pub(crate) struct TileNeighbors {
    pub(crate) list: NeighborList,
    pub(crate) num_particles: usize,
}

/// The particles a rank owns, with their ghost segments, region masks,
/// sort runs and neighbor lists.
pub struct ParticleContainer {
    pub(crate) decomp: Decomposition,
    pub(crate) rank: usize,
    pub(crate) ncells: i32,
    pub(crate) tiles: BTreeMap<TileKey, ParticleTile>,
    pub(crate) masks: Option<RegionMasks>,
    /// Runs of the last sort, per grid.
    pub(crate) runs: BTreeMap<usize, RegionRuns>,
    pub(crate) lists: BTreeMap<TileKey, TileNeighbors>,
    ids: ParticleIdAllocator,
}

impl ParticleContainer {
    /// Empty container for the grids `rank` owns, exchanging ghosts within
    /// `ncells` cells of each grid boundary.
    pub fn new(decomp: Decomposition, rank: usize, ncells: i32) -> Self {
        let tiles = decomp
            .local_grids(rank)
            .into_iter()
            .map(|g| (TileKey::grid(g), ParticleTile::new()))
            .collect();
        Self {
            decomp,
            rank,
            ncells,
            tiles,
            masks: None,
            runs: BTreeMap::new(),
            lists: BTreeMap::new(),
            ids: ParticleIdAllocator::new(rank as u32),
        }
    }

    /// The decomposition the container lives on.
    pub fn decomposition(&self) -> &Decomposition {
        &self.decomp
    }

    /// Rank owning this container.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Ghost shell depth in cells.
    pub fn ncells(&self) -> i32 {
        self.ncells
    }

    /// Grids owned by this rank, ascending.
    pub fn local_grids(&self) -> impl Iterator<Item = usize> + '_ {
        self.tiles.keys().map(|k| k.grid)
    }

    /// Tile at `key`, if this rank owns it.
    pub fn tile(&self, key: TileKey) -> Option<&ParticleTile> {
        self.tiles.get(&key)
    }

    /// Every local tile in key order.
    pub fn tiles(&self) -> impl Iterator<Item = (&TileKey, &ParticleTile)> {
        self.tiles.iter()
    }

    /// Total owned particles on this rank.
    pub fn num_real(&self) -> usize {
        self.tiles.values().map(ParticleTile::num_real).sum()
    }

    /// Total ghost copies on this rank.
    pub fn num_ghosts(&self) -> usize {
        self.tiles.values().map(ParticleTile::num_ghosts).sum()
    }

    /// Cached region masks, if built.
    pub fn region_masks(&self) -> Option<&RegionMasks> {
        self.masks.as_ref()
    }

    /// Build the region masks of the local grids.
    ///
    /// Does nothing if masks for the current decomposition generation exist.
    pub fn build_region_mask(&mut self) -> Result<(), NeighborError> {
        if let Some(masks) = &self.masks {
            if masks.generation() == self.decomp.generation() && masks.ncells() == self.ncells {
                return Ok(());
            }
        }
        let grids: Vec<usize> = self.local_grids().collect();
        self.masks = Some(RegionMasks::build(&self.decomp, &grids, self.ncells)?);
        self.runs.clear();
        Ok(())
    }

    /// Drop the cached masks; the next exchange rebuilds them.
    pub fn invalidate_region_mask(&mut self) {
        self.masks = None;
        self.runs.clear();
    }

    /// Store `p` in the local grid containing it.
    pub fn add_particle(&mut self, p: Particle) -> Result<TileKey, NeighborError> {
        let grid = self
            .decomp
            .grid_of_position(p.pos)
            .ok_or(NeighborError::ParticleOutsideDomain {
                particle: p.key(),
                pos: p.pos,
            })?;
        let key = TileKey::grid(grid);
        let tile = self.tiles.get_mut(&key).ok_or(NeighborError::GridNotLocal {
            grid,
            rank: self.rank,
        })?;
        tile.push_real(p);
        self.runs.remove(&grid);
        self.lists.remove(&key);
        Ok(key)
    }

    /// Create a particle at `pos` with this rank's next id and store it.
    pub fn create_particle(&mut self, pos: [f64; 3], vel: [f64; 3]) -> Result<TileKey, NeighborError> {
        let p = self.ids.create(pos).with_velocity(vel);
        self.add_particle(p)
    }

    /// Fill every local grid with `ppc` particles per cell on a regular
    /// sub-lattice, with velocities `mean + N(0, std)` per component.
    ///
    /// Each grid draws from its own stream, seeded by `seed` and the grid id,
    /// so the initial state does not depend on the number of ranks.
    pub fn init_particles(&mut self, ppc: [usize; 3], mean: f64, std: f64, seed: u64) -> Result<usize, NeighborError> {
        let normal = Normal::new(0.0, std).map_err(|e| NeighborError::Config(format!("thermal momentum: {e}")))?;
        let geom = self.decomp.geom().clone();
        let dx = geom.cell_size();
        let per_cell = ppc[0] * ppc[1] * ppc[2];

        let grids: Vec<usize> = self.local_grids().collect();
        let mut created = 0;
        for grid in grids {
            let bx = *self.decomp.grids().get(grid);
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(grid as u64));
            let mut batch = Vec::with_capacity(bx.num_cells() * per_cell);
            for cell in bx.cells() {
                let (cell_lo, _) = geom.box_bounds(&IntBox::new(cell, cell));
                for i in 0..per_cell {
                    let unit = unit_cell_position(ppc, i);
                    let pos = [
                        cell_lo[0] + unit[0] * dx[0],
                        cell_lo[1] + unit[1] * dx[1],
                        cell_lo[2] + unit[2] * dx[2],
                    ];
                    let vel = [
                        mean + normal.sample(&mut rng),
                        mean + normal.sample(&mut rng),
                        mean + normal.sample(&mut rng),
                    ];
                    batch.push(self.ids.create(pos).with_velocity(vel));
                }
            }
            created += batch.len();
            let key = TileKey::grid(grid);
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.extend_real(&batch);
            }
            self.runs.remove(&grid);
            self.lists.remove(&key);
        }
        tracing::info!("rank {}: placed {} particles ({} per cell)", self.rank, created, per_cell);
        Ok(created)
    }

    /// Rebuild the neighbor list of every local tile.
    ///
    /// Each tile's particles (real + ghost) are binned over its grid box
    /// grown by the ghost shell.
    pub fn build_neighbor_list<P: PairPredicate>(&mut self, cutoff: f64, predicate: &P) {
        let geom = self.decomp.geom();
        let mut pairs = 0;
        for (key, tile) in &self.tiles {
            let region = self.decomp.grids().get(key.grid).grow(self.ncells);
            let entry = self.lists.entry(*key).or_insert_with(|| TileNeighbors {
                list: NeighborList::new(),
                num_particles: 0,
            });
            entry.list.build(tile.all(), tile.num_real(), &region, geom, cutoff, predicate);
            entry.num_particles = tile.len();
            pairs += entry.list.num_pairs();
        }
        tracing::debug!("rank {}: neighbor lists rebuilt, {} pairs", self.rank, pairs);
    }

    /// Neighbor list of `key`, if built.
    pub fn neighbor_list(&self, key: TileKey) -> Option<&NeighborList> {
        self.lists.get(&key).map(|t| &t.list)
    }

    /// Lazy neighbor sequence of real particle `i` of tile `key`.
    pub fn neighbors(&self, key: TileKey, i: usize) -> Option<Neighbors<'_>> {
        let tile = self.tiles.get(&key)?;
        let entry = self.lists.get(&key)?;
        (i < entry.list.num_particles()).then(|| entry.list.neighbors(i, tile.all()))
    }

    /// Number of listed pairs over all local tiles.
    pub fn num_pairs(&self) -> usize {
        self.lists.values().map(|t| t.list.num_pairs()).sum()
    }

    /// Evaluate pair forces on every real particle from its listed neighbors.
    ///
    /// The lists must match the current tile layout: built after the last
    /// sort, with the same number of ghosts.
    pub fn compute_forces(&mut self, params: &ForceParams) -> Result<(), NeighborError> {
        for (key, tile) in self.tiles.iter_mut() {
            let entry = self
                .lists
                .get(key)
                .ok_or(NeighborError::NeighborListOutOfDate { grid: key.grid })?;
            if entry.num_particles != tile.len() || entry.list.num_particles() != tile.num_real() {
                return Err(NeighborError::NeighborListOutOfDate { grid: key.grid });
            }
            let num_real = tile.num_real();
            kernel::compute_forces(tile.all_mut(), num_real, &entry.list, params);
        }
        Ok(())
    }

    /// Advance every owned particle by `dt`. Ghosts are left as they are.
    pub fn move_particles(&mut self, dt: f64) {
        let geom = self.decomp.geom();
        for tile in self.tiles.values_mut() {
            kernel::move_particles(tile.real_mut(), dt, geom);
        }
    }

    /// Kinetic energy `sum m v^2 / 2` of the owned particles.
    pub fn kinetic_energy(&self, mass: f64) -> f64 {
        self.tiles
            .values()
            .flat_map(|t| t.real())
            .map(|p| 0.5 * mass * (p.vel[0] * p.vel[0] + p.vel[1] * p.vel[1] + p.vel[2] * p.vel[2]))
            .sum()
    }

    /// Copies of every owned particle, in tile order.
    pub fn real_particles(&self) -> Vec<Particle> {
        self.tiles.values().flat_map(|t| t.real().iter().copied()).collect()
    }
}

/// Position of the `i`-th of `ppc` particles inside the unit cell, at the
/// centres of a `ppc[0] x ppc[1] x ppc[2]` sub-lattice.
fn unit_cell_position(ppc: [usize; 3], i: usize) -> [f64; 3] {
    let [nx, ny, nz] = ppc;
    let ix = i / (ny * nz);
    let iy = (i % (ny * nz)) % ny;
    let iz = (i % (ny * nz)) / ny;
    [
        (0.5 + ix as f64) / nx as f64,
        (0.5 + iy as f64) / ny as f64,
        (0.5 + iz as f64) / nz as f64,
    ]
}
