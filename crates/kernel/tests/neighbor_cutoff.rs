//! Neighbor lists agree with an O(n^2) scan, including right at the cutoff.

use kernel::{CutoffPredicate, Geometry, IntBox, NeighborList, Particle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_particles(n: usize, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| Particle::new(i as u64 + 1, 0, [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()]))
        .collect()
}

fn brute_force(ps: &[Particle], num_real: usize, cutoff: f64) -> Vec<Vec<u32>> {
    (0..num_real)
        .map(|i| {
            (0..ps.len())
                .filter(|&j| j != i && ps[i].distance_sq(&ps[j]) <= cutoff * cutoff)
                .map(|j| j as u32)
                .collect()
        })
        .collect()
}

#[test]
fn matches_brute_force() {
    let ps = random_particles(600, 7);
    let num_real = 450;
    let cutoff = 0.13;
    let mut list = NeighborList::new();
    list.build_in_region(&ps, num_real, [0.0; 3], [1.0; 3], cutoff, &CutoffPredicate::new(cutoff));

    let expected = brute_force(&ps, num_real, cutoff);
    assert_eq!(list.num_particles(), num_real);
    for (i, want) in expected.iter().enumerate() {
        assert_eq!(list.neighbor_indices(i), want.as_slice(), "particle {i}");
    }
    let total: usize = expected.iter().map(Vec::len).sum();
    assert_eq!(list.num_pairs(), total);
}

#[test]
fn cutoff_boundary_is_inclusive() {
    let cutoff = 0.25;
    let eps = 1e-9;
    let ps = vec![
        Particle::new(1, 0, [0.5, 0.5, 0.5]),
        Particle::new(2, 0, [0.5 + cutoff - eps, 0.5, 0.5]),
        Particle::new(3, 0, [0.5, 0.5 - cutoff - eps, 0.5]),
    ];
    let mut list = NeighborList::new();
    list.build_in_region(&ps, 1, [0.0; 3], [1.0; 3], cutoff, &CutoffPredicate::new(cutoff));
    let ids: Vec<u64> = list.neighbors(0, &ps).map(|p| p.id).collect();
    assert_eq!(ids, vec![2]);
}

#[test]
fn ghosts_outside_the_tile_box_are_found() {
    // Tile covers cells 0..=3 of a 0.25-wide grid; grown by one cell the
    // binned region reaches from -0.25 to 1.25.
    let geom = Geometry::new([0.0; 3], [1.0; 3], IntBox::new([0; 3], [3; 3]), [true; 3]);
    let grown = IntBox::new([0; 3], [3; 3]).grow(1);
    let ps = vec![
        Particle::new(1, 0, [0.02, 0.5, 0.5]),
        Particle::new(2, 0, [-0.1, 0.5, 0.5]),
        Particle::new(3, 0, [1.1, 0.5, 0.5]),
    ];
    let mut list = NeighborList::new();
    list.build(&ps, 1, &grown, &geom, 0.25, &CutoffPredicate::new(0.25));
    let ids: Vec<u64> = list.neighbors(0, &ps).map(|p| p.id).collect();
    assert_eq!(ids, vec![2]);
}
