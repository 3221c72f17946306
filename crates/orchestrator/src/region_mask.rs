//! Per-grid region masks and neighbor tables.
//!
//! The shell of each grid (the outer `ncells` layers) is cut into face, edge
//! and corner boxes. Box `i` of a grid gets code `i`; the mask stamps code
//! `i` over the box if any neighbor grid's grown box reaches it, and the
//! table lists which neighbors (and under which periodic shift) receive the
//! particles found there.

use std::collections::{BTreeMap, BTreeSet};

use kernel::{IntBox, IntVect, RegionMask, SPACEDIM};
use rayon::prelude::*;

use crate::decomposition::Decomposition;
use crate::error::NeighborError;

/// A grid that receives copies of a region's particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeighborTarget {
    /// Destination grid id.
    pub grid: usize,
    /// Periodic shift (in cells) that carries the source grid onto the
    /// destination's side; the ghost's position is translated by it.
    pub shift: IntVect,
}

/// Region mask and neighbor table of one grid.
#[derive(Debug, Clone)]
pub struct GridRegions {
    /// Code of every cell of the grid.
    pub mask: RegionMask,
    /// Boundary box of every code.
    pub boxes: Vec<IntBox>,
    /// Receivers of every code, each `(grid, shift)` at most once.
    pub targets: Vec<Vec<NeighborTarget>>,
}

impl GridRegions {
    /// Number of codes (boundary boxes), including ones with no receiver.
    pub fn num_codes(&self) -> usize {
        self.boxes.len()
    }

    /// Receivers of `code`.
    pub fn targets(&self, code: i32) -> &[NeighborTarget] {
        &self.targets[code as usize]
    }
}

/// Region masks of a set of grids, built for one decomposition generation.
#[derive(Debug, Clone)]
pub struct RegionMasks {
    generation: u64,
    ncells: i32,
    grids: BTreeMap<usize, GridRegions>,
}

impl RegionMasks {
    /// Build masks and tables for `grids` of `decomp` with shell depth `ncells`.
    pub fn build(decomp: &Decomposition, grids: &[usize], ncells: i32) -> Result<Self, NeighborError> {
        let out: BTreeMap<usize, GridRegions> = grids
            .par_iter()
            .map(|&grid| build_grid_regions(decomp, grid, ncells).map(|r| (grid, r)))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect();
        let boundary_cells: usize = out.values().map(|r| r.mask.num_boundary_cells()).sum();
        tracing::debug!(
            "region masks built: generation {}, {} grids, shell depth {}, {} exported cells",
            decomp.generation(),
            out.len(),
            ncells,
            boundary_cells
        );
        Ok(Self {
            generation: decomp.generation(),
            ncells,
            grids: out,
        })
    }

    /// Generation of the decomposition the masks were built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Shell depth in cells.
    pub fn ncells(&self) -> i32 {
        self.ncells
    }

    /// Regions of `grid`, if it was built.
    pub fn get(&self, grid: usize) -> Option<&GridRegions> {
        self.grids.get(&grid)
    }
}

/// Face, edge and corner boxes of depth `ncells` around `interior`.
///
/// For a grid `b`, pass `b.grow(-ncells)`: the returned boxes then tile the
/// outer `ncells` layers of `b`. Sorted and free of duplicates.
pub fn boundary_boxes(interior: &IntBox, ncells: i32) -> Vec<IntBox> {
    let mut out = Vec::new();
    for i in 0..SPACEDIM {
        let faces = [interior.adj_cell_hi(i, ncells), interior.adj_cell_lo(i, ncells)];
        for face in faces {
            out.push(face);
            for j in (0..SPACEDIM).filter(|&j| j != i) {
                let edges = [face.adj_cell_hi(j, ncells), face.adj_cell_lo(j, ncells)];
                for edge in edges {
                    out.push(edge);
                    for k in (0..SPACEDIM).filter(|&k| k != i && k != j) {
                        out.push(edge.adj_cell_hi(k, ncells));
                        out.push(edge.adj_cell_lo(k, ncells));
                    }
                }
            }
        }
    }
    out.retain(|b| !b.is_empty());
    out.sort();
    out.dedup();
    out
}

/// Region mask and neighbor table of one grid.
pub fn build_grid_regions(decomp: &Decomposition, grid: usize, ncells: i32) -> Result<GridRegions, NeighborError> {
    let grids = decomp.grids();
    let bx = *grids.get(grid);

    if !bx.is_cell_centered() {
        return Err(NeighborError::NotCellCentered { grid });
    }
    let extent = bx.size();
    if extent.iter().any(|&n| 2 * ncells > n) {
        return Err(NeighborError::ShellTooDeep { grid, ncells, extent });
    }

    // --- 1. Neighbor grids under every periodic shift, in this grid's frame ---
    let mut candidates: BTreeSet<(NeighborTarget, IntBox)> = BTreeSet::new();
    let mut lost_self_images = false;
    for shift in decomp.geom().periodic_shifts() {
        for (nbor, isec) in grids.intersections(&bx.shift(shift), ncells) {
            if nbor == grid {
                lost_self_images |= shift != [0; 3];
                continue;
            }
            let back = [-shift[0], -shift[1], -shift[2]];
            candidates.insert((NeighborTarget { grid: nbor, shift }, isec.shift(back)));
        }
    }
    if lost_self_images {
        tracing::warn!(
            "grid {} is its own periodic neighbor; its self images are not exchanged",
            grid
        );
    }

    // --- 2. Stamp boundary boxes that some neighbor reaches ---
    let boxes = boundary_boxes(&bx.grow(-ncells), ncells);
    let mut mask = RegionMask::new(bx);
    let mut targets = Vec::with_capacity(boxes.len());
    for (code, region) in boxes.iter().enumerate() {
        let mut receivers: Vec<NeighborTarget> = candidates
            .iter()
            .filter(|(_, isec)| isec.intersects(region))
            .map(|(target, _)| *target)
            .collect();
        receivers.dedup();
        if !receivers.is_empty() {
            mask.stamp(region, code as i32);
        }
        targets.push(receivers);
    }

    Ok(GridRegions { mask, boxes, targets })
}
