//! Short-range pair force evaluated over a tile's neighbor list.

use rayon::prelude::*;

use crate::neighbor::NeighborList;
use crate::particle::Particle;

/// Parameters of the softened pair force.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceParams {
    /// Interaction radius; the force vanishes at `r == cutoff`.
    pub cutoff: f64,
    /// Separations below this are clamped to it.
    pub min_r: f64,
    /// Particle mass.
    pub mass: f64,
}

/// Acceleration on `a` due to `b`.
///
/// With `d = a - b`, `r^2` is clamped to `min_r^2`, then
/// `coef = (1 - cutoff / r) / r^2 / mass` and the result is `coef * d`.
/// `coef` is negative inside the cutoff, so the pair attracts.
#[inline]
pub fn pair_acceleration(a: &Particle, b: &Particle, params: &ForceParams) -> [f64; 3] {
    let d = [a.pos[0] - b.pos[0], a.pos[1] - b.pos[1], a.pos[2] - b.pos[2]];
    let r2 = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).max(params.min_r * params.min_r);
    let r = r2.sqrt();
    let coef = (1.0 - params.cutoff / r) / r2 / params.mass;
    [coef * d[0], coef * d[1], coef * d[2]]
}

/// Overwrite the acceleration of the first `num_real` particles with the sum
/// of pair accelerations from their listed neighbors.
///
/// `particles` is the tile's real + ghost array the list was built from.
/// Ghost accelerations are left untouched.
pub fn compute_forces(particles: &mut [Particle], num_real: usize, list: &NeighborList, params: &ForceParams) {
    debug_assert_eq!(list.num_particles(), num_real);
    let accels: Vec<[f64; 3]> = (0..num_real)
        .into_par_iter()
        .map(|i| {
            let p = &particles[i];
            let mut acc = [0.0; 3];
            for q in list.neighbors(i, particles) {
                let a = pair_acceleration(p, q, params);
                acc[0] += a[0];
                acc[1] += a[1];
                acc[2] += a[2];
            }
            acc
        })
        .collect();

    for (p, acc) in particles[..num_real].iter_mut().zip(accels) {
        p.acc = acc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: ForceParams = ForceParams {
        cutoff: 0.1,
        min_r: 0.01,
        mass: 1.0,
    };

    #[test]
    fn force_vanishes_at_cutoff() {
        let a = Particle::new(1, 0, [0.0; 3]);
        let b = Particle::new(2, 0, [0.1, 0.0, 0.0]);
        let acc = pair_acceleration(&a, &b, &PARAMS);
        assert!(acc[0].abs() < 1e-12);
    }

    #[test]
    fn close_pair_attracts() {
        let a = Particle::new(1, 0, [0.0; 3]);
        let b = Particle::new(2, 0, [0.05, 0.0, 0.0]);
        let on_a = pair_acceleration(&a, &b, &PARAMS);
        let on_b = pair_acceleration(&b, &a, &PARAMS);
        // r = 0.05: coef = (1 - 2) / 0.0025 = -400, d = -0.05
        assert!((on_a[0] - 20.0).abs() < 1e-9);
        assert!((on_a[0] + on_b[0]).abs() < 1e-12);
    }

    #[test]
    fn separation_is_clamped() {
        let a = Particle::new(1, 0, [0.0; 3]);
        let near = Particle::new(2, 0, [1e-6, 0.0, 0.0]);
        let at_min = Particle::new(3, 0, [0.01, 0.0, 0.0]);
        let r2 = PARAMS.min_r * PARAMS.min_r;
        let coef = (1.0 - PARAMS.cutoff / PARAMS.min_r) / r2;
        let acc_near = pair_acceleration(&a, &near, &PARAMS);
        let acc_min = pair_acceleration(&a, &at_min, &PARAMS);
        assert!((acc_near[0] + coef * 1e-6).abs() < 1e-9);
        assert!((acc_min[0] + coef * 0.01).abs() < 1e-9);
    }

    #[test]
    fn heavier_particles_accelerate_less() {
        let a = Particle::new(1, 0, [0.0; 3]);
        let b = Particle::new(2, 0, [0.05, 0.0, 0.0]);
        let heavy = ForceParams { mass: 4.0, ..PARAMS };
        let light = pair_acceleration(&a, &b, &PARAMS)[0];
        let slow = pair_acceleration(&a, &b, &heavy)[0];
        assert!((light - 4.0 * slow).abs() < 1e-12);
    }
}
