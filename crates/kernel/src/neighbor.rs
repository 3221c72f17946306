//! Cell-binned neighbor lists over real + ghost particles.
//!
//! Uses sorted-index + cell-offset arrays rather than `HashMap` so the data
//! layout stays flat (no pointer chasing), and stores the result as a
//! two-level index: per-particle start offsets into one flattened id array.

use std::fmt;

use rayon::prelude::*;

use crate::geometry::{Geometry, IntBox};
use crate::particle::Particle;

/// Decides whether a candidate pair belongs in the neighbor list.
pub trait PairPredicate: Sync {
    /// True if `b` is a neighbor of `a`.
    fn accept(&self, a: &Particle, b: &Particle) -> bool;
}

impl<F> PairPredicate for F
where
    F: Fn(&Particle, &Particle) -> bool + Sync,
{
    fn accept(&self, a: &Particle, b: &Particle) -> bool {
        self(a, b)
    }
}

/// Accepts pairs whose separation is at most `cutoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutoffPredicate {
    cutoff_sq: f64,
}

impl CutoffPredicate {
    /// Predicate for interaction radius `cutoff`.
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff_sq: cutoff * cutoff,
        }
    }
}

impl PairPredicate for CutoffPredicate {
    #[inline]
    fn accept(&self, a: &Particle, b: &Particle) -> bool {
        a.distance_sq(b) <= self.cutoff_sq
    }
}

/// Uniform bins over an axis-aligned region.
///
/// Bin edges are at least `min_bin_size` long, so for any particle the 27
/// (3x3x3) surrounding bins hold every particle within `min_bin_size`.
struct CellBins {
    lo: [f64; 3],
    inv_bin_size: [f64; 3],
    dims: [usize; 3],
    /// Particle indices sorted by bin.
    sorted_indices: Vec<u32>,
    /// Start offset in `sorted_indices` for each bin.
    bin_offsets: Vec<u32>,
    /// Number of particles in each bin.
    bin_counts: Vec<u32>,
}

impl CellBins {
    fn new(lo: [f64; 3], hi: [f64; 3], min_bin_size: f64) -> Self {
        assert!(min_bin_size > 0.0, "bin size must be positive");
        let mut dims = [1usize; 3];
        let mut inv_bin_size = [0.0; 3];
        for d in 0..3 {
            let extent = hi[d] - lo[d];
            dims[d] = ((extent / min_bin_size).floor() as usize).max(1);
            inv_bin_size[d] = dims[d] as f64 / extent;
        }
        Self {
            lo,
            inv_bin_size,
            dims,
            sorted_indices: Vec::new(),
            bin_offsets: Vec::new(),
            bin_counts: Vec::new(),
        }
    }

    fn total_bins(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Bin of a position, clamped to the binned region.
    #[inline]
    fn bin_of(&self, pos: [f64; 3]) -> [usize; 3] {
        let mut b = [0usize; 3];
        for d in 0..3 {
            let c = ((pos[d] - self.lo[d]) * self.inv_bin_size[d]).floor();
            b[d] = c.max(0.0).min((self.dims[d] - 1) as f64) as usize;
        }
        b
    }

    #[inline]
    fn flat(&self, b: [usize; 3]) -> usize {
        b[0] + b[1] * self.dims[0] + b[2] * self.dims[0] * self.dims[1]
    }

    fn fill(&mut self, particles: &[Particle]) {
        let total = self.total_bins();

        // --- 1. Bin index for each particle ---
        let bins: Vec<usize> = particles.par_iter().map(|p| self.flat(self.bin_of(p.pos))).collect();

        // --- 2. Count particles per bin ---
        self.bin_counts.clear();
        self.bin_counts.resize(total, 0);
        for &b in &bins {
            self.bin_counts[b] += 1;
        }

        // --- 3. Prefix-sum to get bin offsets ---
        self.bin_offsets.clear();
        self.bin_offsets.resize(total, 0);
        let mut running = 0u32;
        for b in 0..total {
            self.bin_offsets[b] = running;
            running += self.bin_counts[b];
        }

        // --- 4. Scatter particle indices into sorted order ---
        self.sorted_indices.clear();
        self.sorted_indices.resize(particles.len(), 0);
        let mut write_heads = self.bin_offsets.clone();
        for (i, &b) in bins.iter().enumerate() {
            let slot = write_heads[b] as usize;
            self.sorted_indices[slot] = i as u32;
            write_heads[b] += 1;
        }
    }

    /// Call `f` with every particle index in the bins adjacent to `pos`.
    fn for_each_candidate<F: FnMut(usize)>(&self, pos: [f64; 3], mut f: F) {
        let c = self.bin_of(pos);
        let lo = |d: usize| c[d].saturating_sub(1);
        let hi = |d: usize| (c[d] + 1).min(self.dims[d] - 1);
        for bz in lo(2)..=hi(2) {
            for by in lo(1)..=hi(1) {
                for bx in lo(0)..=hi(0) {
                    let bin = self.flat([bx, by, bz]);
                    let start = self.bin_offsets[bin] as usize;
                    let count = self.bin_counts[bin] as usize;
                    for &j in &self.sorted_indices[start..start + count] {
                        f(j as usize);
                    }
                }
            }
        }
    }
}

/// Neighbor list of one tile: for each real particle, the indices of the
/// real or ghost particles that passed the pair predicate.
#[derive(Debug, Clone, Default)]
pub struct NeighborList {
    /// `offsets[i]..offsets[i + 1]` is particle `i`'s slice of `neighbors`.
    offsets: Vec<u32>,
    neighbors: Vec<u32>,
}

impl NeighborList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the list for the tile box `bx` (already grown by the ghost shell).
    ///
    /// `particles` holds the tile's real particles followed by its ghosts;
    /// lists are produced for the first `num_real` only. Candidates come from
    /// bins no smaller than `cutoff`, so `predicate` must not accept pairs
    /// farther apart than `cutoff`.
    pub fn build<P: PairPredicate>(
        &mut self,
        particles: &[Particle],
        num_real: usize,
        bx: &IntBox,
        geom: &Geometry,
        cutoff: f64,
        predicate: &P,
    ) {
        let (lo, hi) = geom.box_bounds(bx);
        self.build_in_region(particles, num_real, lo, hi, cutoff, predicate);
    }

    /// Rebuild the list, binning over the physical region `lo..hi`.
    pub fn build_in_region<P: PairPredicate>(
        &mut self,
        particles: &[Particle],
        num_real: usize,
        lo: [f64; 3],
        hi: [f64; 3],
        cutoff: f64,
        predicate: &P,
    ) {
        debug_assert!(num_real <= particles.len());
        let mut bins = CellBins::new(lo, hi, cutoff);
        bins.fill(particles);

        let per_particle: Vec<Vec<u32>> = (0..num_real)
            .into_par_iter()
            .map(|i| {
                let p = &particles[i];
                let mut found = Vec::new();
                bins.for_each_candidate(p.pos, |j| {
                    if j != i && predicate.accept(p, &particles[j]) {
                        found.push(j as u32);
                    }
                });
                found.sort_unstable();
                found
            })
            .collect();

        self.offsets.clear();
        self.offsets.reserve(num_real + 1);
        self.neighbors.clear();
        self.offsets.push(0);
        for list in &per_particle {
            self.neighbors.extend_from_slice(list);
            self.offsets.push(self.neighbors.len() as u32);
        }

        tracing::trace!(
            "neighbor list rebuilt: {} real, {} total, {} pairs, {:?} bins",
            num_real,
            particles.len(),
            self.neighbors.len(),
            bins.dims
        );
    }

    /// Number of particles the list covers.
    pub fn num_particles(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of stored (directed) pairs.
    pub fn num_pairs(&self) -> usize {
        self.neighbors.len()
    }

    /// Neighbor indices of particle `i`.
    pub fn neighbor_indices(&self, i: usize) -> &[u32] {
        let start = self.offsets[i] as usize;
        let stop = self.offsets[i + 1] as usize;
        &self.neighbors[start..stop]
    }

    /// Neighbors of particle `i`, resolved against the tile's particles.
    ///
    /// The iterator is lazy and cheap to clone, so it can be restarted.
    pub fn neighbors<'a>(&'a self, i: usize, particles: &'a [Particle]) -> Neighbors<'a> {
        Neighbors {
            ids: self.neighbor_indices(i).iter(),
            particles,
        }
    }
}

impl fmt::Display for NeighborList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.num_particles() {
            writeln!(f, "particle {} -> {:?}", i, self.neighbor_indices(i))?;
        }
        Ok(())
    }
}

/// Lazy sequence of one particle's neighbors.
#[derive(Clone)]
pub struct Neighbors<'a> {
    ids: std::slice::Iter<'a, u32>,
    particles: &'a [Particle],
}

impl<'a> Iterator for Neighbors<'a> {
    type Item = &'a Particle;

    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next().map(|&j| &self.particles[j as usize])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for Neighbors<'_> {}
