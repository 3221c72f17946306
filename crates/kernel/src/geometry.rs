//! Integer cell boxes and the physical <-> index-space mapping of the domain.
//!
//! Boxes are inclusive on both ends (`lo..=hi` per axis), so a single cell has
//! `lo == hi`. All index arithmetic is done in `i32` because boxes grown past
//! the domain edge (ghost shells, periodic images) have negative corners.

/// Integer cell coordinate `[i, j, k]`.
pub type IntVect = [i32; 3];

/// Number of spatial dimensions.
pub const SPACEDIM: usize = 3;

/// Centering of a box's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    /// Indices name cells.
    Cell,
    /// Indices name nodes (cell corners).
    Node,
}

/// Axis-aligned box of integer cells, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntBox {
    /// Smallest cell in the box.
    pub lo: IntVect,
    /// Largest cell in the box.
    pub hi: IntVect,
    /// Cell- or node-centering.
    pub index_type: IndexType,
}

impl IntBox {
    /// Create a cell-centered box covering `lo..=hi`.
    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        Self {
            lo,
            hi,
            index_type: IndexType::Cell,
        }
    }

    /// Same box with a different index type.
    pub fn with_index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// True for cell-centered boxes.
    pub fn is_cell_centered(&self) -> bool {
        self.index_type == IndexType::Cell
    }

    /// True if the box contains no cells.
    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.lo[d] > self.hi[d])
    }

    /// Number of cells along each axis (zero on empty axes).
    pub fn size(&self) -> IntVect {
        let mut s = [0; 3];
        for d in 0..SPACEDIM {
            s[d] = (self.hi[d] - self.lo[d] + 1).max(0);
        }
        s
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> usize {
        let s = self.size();
        s.iter().map(|&n| n as usize).product()
    }

    /// True if `iv` lies inside the box.
    #[inline]
    pub fn contains(&self, iv: IntVect) -> bool {
        (0..SPACEDIM).all(|d| iv[d] >= self.lo[d] && iv[d] <= self.hi[d])
    }

    /// True if `other` lies entirely inside this box.
    pub fn contains_box(&self, other: &IntBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    /// Grow by `n` cells on every side (shrink for negative `n`).
    pub fn grow(&self, n: i32) -> Self {
        let mut b = *self;
        for d in 0..SPACEDIM {
            b.lo[d] -= n;
            b.hi[d] += n;
        }
        b
    }

    /// Translate by `s` cells.
    pub fn shift(&self, s: IntVect) -> Self {
        let mut b = *self;
        for d in 0..SPACEDIM {
            b.lo[d] += s[d];
            b.hi[d] += s[d];
        }
        b
    }

    /// Intersection of two boxes, `None` if they do not overlap.
    pub fn intersect(&self, other: &IntBox) -> Option<IntBox> {
        let mut b = *self;
        for d in 0..SPACEDIM {
            b.lo[d] = self.lo[d].max(other.lo[d]);
            b.hi[d] = self.hi[d].min(other.hi[d]);
        }
        if b.is_empty() {
            None
        } else {
            Some(b)
        }
    }

    /// True if the boxes share at least one cell.
    pub fn intersects(&self, other: &IntBox) -> bool {
        self.intersect(other).is_some()
    }

    /// Slab of `len` cells adjacent to the low face along `dir`, outside the box.
    pub fn adj_cell_lo(&self, dir: usize, len: i32) -> Self {
        let mut b = *self;
        b.hi[dir] = self.lo[dir] - 1;
        b.lo[dir] = self.lo[dir] - len;
        b
    }

    /// Slab of `len` cells adjacent to the high face along `dir`, outside the box.
    pub fn adj_cell_hi(&self, dir: usize, len: i32) -> Self {
        let mut b = *self;
        b.lo[dir] = self.hi[dir] + 1;
        b.hi[dir] = self.hi[dir] + len;
        b
    }

    /// Linear offset of `iv` within the box, x fastest.
    #[inline]
    pub fn offset_of(&self, iv: IntVect) -> usize {
        let s = self.size();
        let i = (iv[0] - self.lo[0]) as usize;
        let j = (iv[1] - self.lo[1]) as usize;
        let k = (iv[2] - self.lo[2]) as usize;
        i + j * s[0] as usize + k * s[0] as usize * s[1] as usize
    }

    /// Iterate over every cell of the box, x fastest.
    pub fn cells(&self) -> impl Iterator<Item = IntVect> {
        let (lo, hi) = (self.lo, self.hi);
        (lo[2]..=hi[2]).flat_map(move |k| {
            (lo[1]..=hi[1]).flat_map(move |j| (lo[0]..=hi[0]).map(move |i| [i, j, k]))
        })
    }
}

/// Physical extent, index domain and periodicity of the simulation.
///
/// Maps positions to cells with `floor((x - prob_lo) / dx) + domain.lo`, the
/// same mapping used everywhere a particle is binned.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Lower physical corner.
    pub prob_lo: [f64; 3],
    /// Upper physical corner.
    pub prob_hi: [f64; 3],
    /// Index-space box covering the whole domain.
    pub domain: IntBox,
    /// Periodicity per axis.
    pub is_periodic: [bool; 3],
    cell_size: [f64; 3],
    inv_cell_size: [f64; 3],
}

impl Geometry {
    /// Create a geometry; `domain` must be non-empty and `prob_hi > prob_lo`.
    pub fn new(prob_lo: [f64; 3], prob_hi: [f64; 3], domain: IntBox, is_periodic: [bool; 3]) -> Self {
        assert!(!domain.is_empty(), "domain box must not be empty");
        let n = domain.size();
        let mut cell_size = [0.0; 3];
        let mut inv_cell_size = [0.0; 3];
        for d in 0..SPACEDIM {
            assert!(prob_hi[d] > prob_lo[d], "prob_hi must exceed prob_lo on every axis");
            cell_size[d] = (prob_hi[d] - prob_lo[d]) / n[d] as f64;
            inv_cell_size[d] = 1.0 / cell_size[d];
        }
        Self {
            prob_lo,
            prob_hi,
            domain,
            is_periodic,
            cell_size,
            inv_cell_size,
        }
    }

    /// Physical edge length of one cell.
    pub fn cell_size(&self) -> [f64; 3] {
        self.cell_size
    }

    /// Reciprocal of [`Geometry::cell_size`].
    pub fn inv_cell_size(&self) -> [f64; 3] {
        self.inv_cell_size
    }

    /// Physical domain length along `dir`.
    pub fn prob_length(&self, dir: usize) -> f64 {
        self.prob_hi[dir] - self.prob_lo[dir]
    }

    /// Cell containing position `pos`. Not clamped to the domain.
    #[inline]
    pub fn cell_index(&self, pos: [f64; 3]) -> IntVect {
        let mut iv = [0; 3];
        for d in 0..SPACEDIM {
            iv[d] = ((pos[d] - self.prob_lo[d]) * self.inv_cell_size[d]).floor() as i32 + self.domain.lo[d];
        }
        iv
    }

    /// Physical lower and upper corners of an index box.
    pub fn box_bounds(&self, bx: &IntBox) -> ([f64; 3], [f64; 3]) {
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for d in 0..SPACEDIM {
            lo[d] = self.prob_lo[d] + (bx.lo[d] - self.domain.lo[d]) as f64 * self.cell_size[d];
            hi[d] = self.prob_lo[d] + (bx.hi[d] + 1 - self.domain.lo[d]) as f64 * self.cell_size[d];
        }
        (lo, hi)
    }

    /// True if any axis is periodic.
    pub fn is_any_periodic(&self) -> bool {
        self.is_periodic.iter().any(|&p| p)
    }

    /// Every periodic image offset in cells, the zero shift first.
    ///
    /// Each periodic axis contributes `{0, -N, +N}` where `N` is the domain
    /// length in cells; non-periodic axes contribute only `0`.
    pub fn periodic_shifts(&self) -> Vec<IntVect> {
        let n = self.domain.size();
        let choices: Vec<Vec<i32>> = (0..SPACEDIM)
            .map(|d| {
                if self.is_periodic[d] {
                    vec![0, -n[d], n[d]]
                } else {
                    vec![0]
                }
            })
            .collect();

        let mut shifts = Vec::with_capacity(27);
        for &sz in &choices[2] {
            for &sy in &choices[1] {
                for &sx in &choices[0] {
                    shifts.push([sx, sy, sz]);
                }
            }
        }
        shifts.sort_by_key(|s| s.iter().any(|&c| c != 0));
        shifts
    }

    /// `pos` mapped into `[prob_lo, prob_hi)` along every periodic axis.
    /// Non-periodic components are returned unchanged.
    pub fn periodic_image(&self, mut pos: [f64; 3]) -> [f64; 3] {
        for d in 0..SPACEDIM {
            if !self.is_periodic[d] {
                continue;
            }
            let (lo, hi) = (self.prob_lo[d], self.prob_hi[d]);
            if pos[d] < lo || pos[d] >= hi {
                pos[d] = lo + (pos[d] - lo).rem_euclid(hi - lo);
                // rem_euclid can round up to exactly the length
                if pos[d] >= hi {
                    pos[d] = lo;
                }
            }
        }
        pos
    }

    /// Physical translation corresponding to a shift in cells.
    pub fn shift_offset(&self, shift: IntVect) -> [f64; 3] {
        let mut off = [0.0; 3];
        for d in 0..SPACEDIM {
            off[d] = shift[d] as f64 * self.cell_size[d];
        }
        off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_geometry(n: i32, periodic: [bool; 3]) -> Geometry {
        Geometry::new([0.0; 3], [1.0; 3], IntBox::new([0; 3], [n - 1; 3]), periodic)
    }

    #[test]
    fn box_size_and_cells() {
        let b = IntBox::new([0, 0, 0], [3, 1, 0]);
        assert_eq!(b.size(), [4, 2, 1]);
        assert_eq!(b.num_cells(), 8);
        assert_eq!(b.cells().count(), 8);
        assert_eq!(b.cells().next(), Some([0, 0, 0]));
        assert_eq!(b.cells().nth(4), Some([0, 1, 0]));
    }

    #[test]
    fn empty_box_has_no_cells() {
        let b = IntBox::new([2, 0, 0], [1, 3, 3]);
        assert!(b.is_empty());
        assert_eq!(b.num_cells(), 0);
        assert_eq!(b.cells().count(), 0);
    }

    #[test]
    fn grow_shrink_and_intersect() {
        let b = IntBox::new([0; 3], [7; 3]);
        let inner = b.grow(-2);
        assert_eq!(inner, IntBox::new([2; 3], [5; 3]));
        assert_eq!(b.intersect(&inner), Some(inner));
        assert!(b.intersect(&b.shift([8, 0, 0])).is_none());
        assert_eq!(
            b.grow(1).intersect(&b.shift([8, 0, 0])),
            Some(IntBox::new([8, 0, 0], [8, 7, 7]))
        );
    }

    #[test]
    fn adjacent_slabs() {
        let b = IntBox::new([1; 3], [4; 3]);
        assert_eq!(b.adj_cell_hi(0, 1), IntBox::new([5, 1, 1], [5, 4, 4]));
        assert_eq!(b.adj_cell_lo(2, 2), IntBox::new([1, 1, -1], [4, 4, 0]));
    }

    #[test]
    fn offsets_are_x_fastest() {
        let b = IntBox::new([1, 1, 1], [2, 3, 4]);
        assert_eq!(b.offset_of([1, 1, 1]), 0);
        assert_eq!(b.offset_of([2, 1, 1]), 1);
        assert_eq!(b.offset_of([1, 2, 1]), 2);
        assert_eq!(b.offset_of([1, 1, 2]), 6);
        let last = b.offset_of(b.hi);
        assert_eq!(last, b.num_cells() - 1);
    }

    #[test]
    fn cell_index_mapping() {
        let geom = unit_geometry(10, [false; 3]);
        assert_eq!(geom.cell_index([0.05, 0.15, 0.95]), [0, 1, 9]);
        assert_eq!(geom.cell_index([-0.01, 0.0, 1.0]), [-1, 0, 10]);
        let (lo, hi) = geom.box_bounds(&IntBox::new([1, 1, 1], [2, 2, 2]));
        assert!((lo[0] - 0.1).abs() < 1e-12);
        assert!((hi[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn cell_index_respects_domain_origin() {
        let geom = Geometry::new([0.0; 3], [1.0; 3], IntBox::new([4; 3], [13; 3]), [false; 3]);
        assert_eq!(geom.cell_index([0.05, 0.05, 0.05]), [4, 4, 4]);
    }

    #[test]
    fn periodic_shift_enumeration() {
        assert_eq!(unit_geometry(4, [false; 3]).periodic_shifts(), vec![[0, 0, 0]]);

        let shifts = unit_geometry(4, [true, false, false]).periodic_shifts();
        assert_eq!(shifts.len(), 3);
        assert_eq!(shifts[0], [0, 0, 0]);
        assert!(shifts.contains(&[4, 0, 0]));
        assert!(shifts.contains(&[-4, 0, 0]));

        let all = unit_geometry(4, [true; 3]).periodic_shifts();
        assert_eq!(all.len(), 27);
        assert_eq!(all[0], [0, 0, 0]);
    }

    #[test]
    fn periodic_image_wraps_only_periodic_axes() {
        let geom = unit_geometry(4, [true, true, false]);
        let p = geom.periodic_image([-0.25, 1.0, -0.25]);
        assert!((p[0] - 0.75).abs() < 1e-12);
        assert_eq!(p[1], 0.0);
        assert_eq!(p[2], -0.25);
        assert_eq!(geom.periodic_image([0.5; 3]), [0.5; 3]);
        assert!((geom.periodic_image([2.3, 0.5, 0.5])[0] - 0.3).abs() < 1e-12);
    }
}
