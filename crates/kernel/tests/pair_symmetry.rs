//! Pair forces through the neighbor list are equal and opposite.

use kernel::{compute_forces, CutoffPredicate, ForceParams, NeighborList, Particle};

#[test]
fn two_particles_equal_and_opposite() {
    let params = ForceParams {
        cutoff: 0.1,
        min_r: 0.001,
        mass: 1.0,
    };
    let mut ps = vec![
        Particle::new(1, 0, [0.45, 0.5, 0.5]),
        Particle::new(2, 0, [0.5, 0.53, 0.5]),
    ];
    let mut list = NeighborList::new();
    list.build_in_region(&ps, 2, [0.0; 3], [1.0; 3], params.cutoff, &CutoffPredicate::new(params.cutoff));
    compute_forces(&mut ps, 2, &list, &params);

    for d in 0..3 {
        assert!((ps[0].acc[d] + ps[1].acc[d]).abs() < 1e-10, "axis {d}");
    }
    // attractive inside the cutoff: the left particle is pulled toward +x
    assert!(ps[0].acc[0] > 0.0);
    assert!(ps[0].acc[1] > 0.0);
}

#[test]
fn momentum_is_conserved_in_a_cluster() {
    let params = ForceParams {
        cutoff: 0.2,
        min_r: 0.01,
        mass: 2.0,
    };
    let mut ps: Vec<Particle> = (0..27)
        .map(|i| {
            let (x, y, z) = (i % 3, (i / 3) % 3, i / 9);
            Particle::new(i as u64, 0, [0.4 + 0.07 * x as f64, 0.4 + 0.06 * y as f64, 0.4 + 0.05 * z as f64])
        })
        .collect();
    let n = ps.len();
    let mut list = NeighborList::new();
    list.build_in_region(&ps, n, [0.0; 3], [1.0; 3], params.cutoff, &CutoffPredicate::new(params.cutoff));
    compute_forces(&mut ps, n, &list, &params);

    for d in 0..3 {
        let total: f64 = ps.iter().map(|p| p.acc[d]).sum();
        assert!(total.abs() < 1e-8, "axis {d}: {total}");
    }
}

#[test]
fn ghost_accelerations_are_untouched() {
    let params = ForceParams {
        cutoff: 0.1,
        min_r: 0.001,
        mass: 1.0,
    };
    let mut ps = vec![Particle::new(1, 0, [0.5; 3]), Particle::new(7, 1, [0.55, 0.5, 0.5])];
    ps[1].acc = [9.0; 3];
    let mut list = NeighborList::new();
    list.build_in_region(&ps, 1, [0.0; 3], [1.0; 3], params.cutoff, &CutoffPredicate::new(params.cutoff));
    compute_forces(&mut ps, 1, &list, &params);
    assert!(ps[0].acc[0] > 0.0);
    assert_eq!(ps[1].acc, [9.0; 3]);
}
