//! Explicit Euler update of owned particles.

use rayon::prelude::*;

use crate::geometry::{Geometry, SPACEDIM};
use crate::particle::Particle;

/// Advance `particles` by `dt`: `v += a dt`, then `x += v dt`.
///
/// Non-periodic axes reflect off the domain walls, flipping that velocity
/// component on every bounce, until the position lies in `[prob_lo, prob_hi)`.
/// Periodic axes are left unwrapped; redistribution maps them back into the
/// domain, so ghosts refreshed before then keep their periodic offsets.
pub fn move_particles(particles: &mut [Particle], dt: f64, geom: &Geometry) {
    particles.par_iter_mut().for_each(|p| {
        for d in 0..SPACEDIM {
            p.vel[d] += p.acc[d] * dt;
            p.pos[d] += p.vel[d] * dt;
            if !geom.is_periodic[d] {
                reflect_into(&mut p.pos[d], &mut p.vel[d], geom.prob_lo[d], geom.prob_hi[d]);
            }
        }
    });
}

fn reflect_into(x: &mut f64, v: &mut f64, lo: f64, hi: f64) {
    while x.is_finite() && (*x < lo || *x >= hi) {
        *x = if *x < lo { 2.0 * lo - *x } else { 2.0 * hi - *x };
        *v = -*v;
        // 2 hi - hi == hi, so step just inside
        if *x == hi {
            *x = hi - (hi - lo) * f64::EPSILON;
        }
    }
}
