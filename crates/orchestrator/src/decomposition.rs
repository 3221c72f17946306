//! Domain decomposition: grids, their owners, and a generation counter.

use std::sync::atomic::{AtomicU64, Ordering};

use kernel::{Geometry, IntBox, IntVect, SPACEDIM};

/// Ordered list of disjoint grid boxes. A grid's id is its index.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxArray {
    boxes: Vec<IntBox>,
}

impl BoxArray {
    /// Wrap an explicit list of boxes.
    pub fn new(boxes: Vec<IntBox>) -> Self {
        Self { boxes }
    }

    /// Tile `domain` with boxes of at most `max_grid_size` cells per axis.
    ///
    /// Grids are ordered x fastest. The last grid along an axis takes the
    /// remainder.
    pub fn chop(domain: &IntBox, max_grid_size: i32) -> Self {
        assert!(max_grid_size > 0, "max_grid_size must be positive");
        let cuts: Vec<Vec<(i32, i32)>> = (0..SPACEDIM)
            .map(|d| {
                let mut spans = Vec::new();
                let mut lo = domain.lo[d];
                while lo <= domain.hi[d] {
                    let hi = (lo + max_grid_size - 1).min(domain.hi[d]);
                    spans.push((lo, hi));
                    lo = hi + 1;
                }
                spans
            })
            .collect();

        let mut boxes = Vec::new();
        for &(zlo, zhi) in &cuts[2] {
            for &(ylo, yhi) in &cuts[1] {
                for &(xlo, xhi) in &cuts[0] {
                    boxes.push(IntBox::new([xlo, ylo, zlo], [xhi, yhi, zhi]).with_index_type(domain.index_type));
                }
            }
        }
        Self { boxes }
    }

    /// Number of grids.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// True if there are no grids.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Box of grid `i`.
    pub fn get(&self, i: usize) -> &IntBox {
        &self.boxes[i]
    }

    /// All boxes in grid order.
    pub fn boxes(&self) -> &[IntBox] {
        &self.boxes
    }

    /// Every grid whose box grown by `grow` cells meets `bx`, with the
    /// overlap (`bx` clipped to the grown grid box).
    pub fn intersections(&self, bx: &IntBox, grow: i32) -> Vec<(usize, IntBox)> {
        self.boxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.grow(grow).intersect(bx).map(|isec| (i, isec)))
            .collect()
    }

    /// Grid whose box contains cell `iv`.
    pub fn grid_containing(&self, iv: IntVect) -> Option<usize> {
        self.boxes.iter().position(|b| b.contains(iv))
    }
}

/// Owner rank of every grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionMapping {
    owners: Vec<usize>,
}

impl DistributionMapping {
    /// Deal grids out to ranks in turn.
    pub fn round_robin(num_grids: usize, num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "need at least one rank");
        Self {
            owners: (0..num_grids).map(|g| g % num_ranks).collect(),
        }
    }

    /// Explicit owner per grid.
    pub fn from_owners(owners: Vec<usize>) -> Self {
        Self { owners }
    }

    /// Rank owning grid `grid`.
    pub fn owner(&self, grid: usize) -> usize {
        self.owners[grid]
    }

    /// Number of grids mapped.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True if no grids are mapped.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Geometry, grids and ownership of one decomposition.
///
/// Every value gets a fresh `generation`; anything derived from the grids
/// (region masks) is keyed by it and rebuilt when it changes.
#[derive(Debug, Clone)]
pub struct Decomposition {
    geom: Geometry,
    grids: BoxArray,
    dmap: DistributionMapping,
    generation: u64,
}

impl Decomposition {
    /// Assemble a decomposition; `dmap` must map every grid.
    pub fn new(geom: Geometry, grids: BoxArray, dmap: DistributionMapping) -> Self {
        assert_eq!(grids.len(), dmap.len(), "every grid needs an owner");
        Self {
            geom,
            grids,
            dmap,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Problem geometry.
    pub fn geom(&self) -> &Geometry {
        &self.geom
    }

    /// Grid boxes.
    pub fn grids(&self) -> &BoxArray {
        &self.grids
    }

    /// Grid ownership.
    pub fn dmap(&self) -> &DistributionMapping {
        &self.dmap
    }

    /// Identifies this decomposition among all created in the process.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the ownership map; the result is a new generation.
    pub fn with_dmap(&self, dmap: DistributionMapping) -> Self {
        Self::new(self.geom.clone(), self.grids.clone(), dmap)
    }

    /// Grids owned by `rank`, ascending.
    pub fn local_grids(&self, rank: usize) -> Vec<usize> {
        (0..self.grids.len()).filter(|&g| self.dmap.owner(g) == rank).collect()
    }

    /// Grid containing `pos`, `None` if the position maps outside every grid.
    pub fn grid_of_position(&self, pos: [f64; 3]) -> Option<usize> {
        self.grids.grid_containing(self.geom.cell_index(pos))
    }
}
