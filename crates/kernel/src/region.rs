//! Region codes: classification of a grid's particles by boundary region.
//!
//! A [`RegionMask`] assigns every cell of a grid either [`INTERIOR`] or the
//! code of the boundary box the cell belongs to. Sorting a grid's particles
//! by that code turns each boundary box into one contiguous run, which is
//! what the ghost exchange ships around.

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;

use crate::geometry::{Geometry, IntBox, IntVect};
use crate::particle::Particle;

/// Mask value of cells that never need to be exchanged.
pub const INTERIOR: i32 = -1;

/// Per-grid field of region codes over the grid's cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    bx: IntBox,
    codes: Vec<i32>,
}

impl RegionMask {
    /// Mask over `bx` with every cell set to [`INTERIOR`].
    pub fn new(bx: IntBox) -> Self {
        Self {
            bx,
            codes: vec![INTERIOR; bx.num_cells()],
        }
    }

    /// Cells covered by the mask.
    pub fn bx(&self) -> &IntBox {
        &self.bx
    }

    /// Code at `iv`, `None` outside the mask.
    #[inline]
    pub fn get(&self, iv: IntVect) -> Option<i32> {
        if self.bx.contains(iv) {
            Some(self.codes[self.bx.offset_of(iv)])
        } else {
            None
        }
    }

    /// Set every cell of `region` (clipped to the mask) to `code`.
    pub fn stamp(&mut self, region: &IntBox, code: i32) {
        let Some(clipped) = self.bx.intersect(region) else {
            return;
        };
        for iv in clipped.cells() {
            let off = self.bx.offset_of(iv);
            self.codes[off] = code;
        }
    }

    /// Number of cells carrying a non-negative code.
    pub fn num_boundary_cells(&self) -> usize {
        self.codes.iter().filter(|&&c| c != INTERIOR).count()
    }
}

/// A particle whose cell lies outside its grid's mask.
///
/// The ghost shell has to cover every particle a grid owns; hitting this means
/// a particle was not redistributed to the grid that contains it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutsideMaskError {
    /// `(cpu, id)` of the offending particle.
    pub particle: (u32, u64),
    /// Cell the particle maps to.
    pub cell: IntVect,
    /// Extent of the mask it was looked up in.
    pub mask_box: IntBox,
}

impl fmt::Display for OutsideMaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "particle {:?} maps to cell {:?} outside region mask {:?}..={:?}",
            self.particle, self.cell, self.mask_box.lo, self.mask_box.hi
        )
    }
}

impl std::error::Error for OutsideMaskError {}

/// Region code of every particle, in input order.
pub fn classify(particles: &[Particle], mask: &RegionMask, geom: &Geometry) -> Result<Vec<i32>, OutsideMaskError> {
    particles
        .par_iter()
        .map(|p| {
            let cell = geom.cell_index(p.pos);
            mask.get(cell).ok_or(OutsideMaskError {
                particle: p.key(),
                cell,
                mask_box: *mask.bx(),
            })
        })
        .collect()
}

/// `[start, stop)` of every code's run in a code-sorted particle array.
///
/// Indexed by `code + 1` so that [`INTERIOR`] has a slot too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRuns {
    start: Vec<usize>,
    stop: Vec<usize>,
    len: usize,
}

impl RegionRuns {
    /// Locate every run of `sorted_codes` for codes `-1..num_codes`.
    ///
    /// Two binary searches per code over the keys
    /// `-1, 0, .., num_codes - 1`.
    pub fn locate(sorted_codes: &[i32], num_codes: usize) -> Self {
        debug_assert!(sorted_codes.windows(2).all(|w| w[0] <= w[1]));
        let keys = (INTERIOR..num_codes as i32).collect::<Vec<_>>();
        let start = keys
            .iter()
            .map(|&code| sorted_codes.partition_point(|&c| c < code))
            .collect();
        let stop = keys
            .iter()
            .map(|&code| sorted_codes.partition_point(|&c| c <= code))
            .collect();
        Self {
            start,
            stop,
            len: sorted_codes.len(),
        }
    }

    /// Number of non-interior codes.
    pub fn num_codes(&self) -> usize {
        self.start.len() - 1
    }

    /// Number of particles the runs were computed for.
    pub fn num_particles(&self) -> usize {
        self.len
    }

    /// Index range of `code`'s run (empty if no particle carries it).
    pub fn run(&self, code: i32) -> Range<usize> {
        let slot = (code + 1) as usize;
        self.start[slot]..self.stop[slot]
    }

    /// Non-empty runs of exported (non-interior) codes.
    pub fn exported(&self) -> impl Iterator<Item = (i32, Range<usize>)> + '_ {
        (0..self.num_codes() as i32)
            .map(move |code| (code, self.run(code)))
            .filter(|(_, r)| !r.is_empty())
    }
}

/// Stable-sort `particles` by region code and return the code runs.
///
/// The result is a permutation of the input: no particle is created or lost,
/// and particles with equal codes keep their relative order.
pub fn sort_by_region(
    particles: &mut [Particle],
    mask: &RegionMask,
    geom: &Geometry,
    num_codes: usize,
) -> Result<RegionRuns, OutsideMaskError> {
    let codes = classify(particles, mask, geom)?;

    let mut order: Vec<usize> = (0..particles.len()).collect();
    order.par_sort_by_key(|&i| codes[i]);

    let sorted: Vec<Particle> = order.iter().map(|&i| particles[i]).collect();
    particles.copy_from_slice(&sorted);
    let sorted_codes: Vec<i32> = order.iter().map(|&i| codes[i]).collect();

    Ok(RegionRuns::locate(&sorted_codes, num_codes))
}
