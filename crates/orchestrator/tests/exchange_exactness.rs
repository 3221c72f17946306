//! Ghost sets against a brute-force reference.
//!
//! A particle owned by grid `g` must appear as a ghost in grid `h != g`
//! under periodic shift `s` exactly when its cell shifted by `s` lies in
//! `h` grown by the shell depth, with its position translated by `s`.

use std::collections::BTreeMap;
use std::thread;

use kernel::{Geometry, IntBox, Particle};
use orchestrator::{
    BoxArray, ChannelTransport, Decomposition, DistributionMapping, ParticleContainer, TileKey, Transport,
    TransportError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NCELLS: i32 = 1;

/// 12 x 8 x 8 periodic domain chopped into twelve 4^3 grids.
fn lattice(num_ranks: usize) -> Decomposition {
    let domain = IntBox::new([0; 3], [11, 7, 7]);
    let geom = Geometry::new([0.0; 3], [12.0, 8.0, 8.0], domain, [true; 3]);
    let ba = BoxArray::chop(&domain, 4);
    let dm = DistributionMapping::round_robin(ba.len(), num_ranks);
    Decomposition::new(geom, ba, dm)
}

fn particles(n: usize) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(2024);
    (0..n)
        .map(|i| {
            let pos = [rng.gen_range(0.0..12.0), rng.gen_range(0.0..8.0), rng.gen_range(0.0..8.0)];
            Particle::new(i as u64 + 1, 0, pos)
        })
        .collect()
}

/// `(cpu, id, position bits)`, sortable.
type GhostKey = (u32, u64, [u64; 3]);

fn ghost_key(p: &Particle) -> GhostKey {
    (p.cpu, p.id, p.pos.map(f64::to_bits))
}

fn expected_ghosts(decomp: &Decomposition, all: &[Particle]) -> BTreeMap<usize, Vec<GhostKey>> {
    let geom = decomp.geom();
    let grids = decomp.grids();
    let mut out: BTreeMap<usize, Vec<GhostKey>> = (0..grids.len()).map(|g| (g, Vec::new())).collect();
    for p in all {
        let cell = geom.cell_index(p.pos);
        let owner = grids.grid_containing(cell).unwrap();
        for shift in geom.periodic_shifts() {
            let shifted = [cell[0] + shift[0], cell[1] + shift[1], cell[2] + shift[2]];
            for (h, bx) in grids.boxes().iter().enumerate() {
                if h == owner || !bx.grow(NCELLS).contains(shifted) {
                    continue;
                }
                let offset = geom.shift_offset(shift);
                let mut ghost = *p;
                for d in 0..3 {
                    ghost.pos[d] += offset[d];
                }
                out.get_mut(&h).unwrap().push(ghost_key(&ghost));
            }
        }
    }
    for ghosts in out.values_mut() {
        ghosts.sort();
    }
    out
}

fn ghosts_by_grid(pc: &ParticleContainer) -> BTreeMap<usize, Vec<GhostKey>> {
    pc.tiles()
        .map(|(key, tile)| {
            let mut ghosts: Vec<GhostKey> = tile.ghosts().iter().map(ghost_key).collect();
            ghosts.sort();
            (key.grid, ghosts)
        })
        .collect()
}

fn fill_on_ranks(num_ranks: usize, all: Vec<Particle>) -> BTreeMap<usize, Vec<GhostKey>> {
    let handles: Vec<_> = ChannelTransport::cluster(num_ranks)
        .into_iter()
        .map(|mut t| {
            let all = all.clone();
            thread::spawn(move || {
                let rank = t.rank();
                let decomp = lattice(num_ranks);
                let mut pc = ParticleContainer::new(decomp.clone(), rank, NCELLS);
                for p in all {
                    let grid = decomp.grid_of_position(p.pos).unwrap();
                    if decomp.dmap().owner(grid) == rank {
                        pc.add_particle(p).unwrap();
                    }
                }
                pc.fill_neighbors(&mut t).unwrap();
                ghosts_by_grid(&pc)
            })
        })
        .collect();

    let mut merged = BTreeMap::new();
    for h in handles {
        merged.extend(h.join().unwrap());
    }
    merged
}

/// A single-rank communicator that fails the test on any collective.
struct NoCollectives;

impl Transport for NoCollectives {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_reduce_max(&mut self, _: u64) -> Result<u64, TransportError> {
        panic!("single rank issued all_reduce_max");
    }

    fn all_to_all(&mut self, _: &[u64]) -> Result<Vec<u64>, TransportError> {
        panic!("single rank issued all_to_all");
    }

    fn exchange_bytes(&mut self, _: &[(usize, Vec<u8>)], _: &mut [(usize, &mut [u8])]) -> Result<(), TransportError> {
        panic!("single rank issued exchange_bytes");
    }
}

#[test]
fn three_ranks_match_brute_force() {
    let all = particles(800);
    let expected = expected_ghosts(&lattice(3), &all);
    let got = fill_on_ranks(3, all);

    assert_eq!(got.len(), 12);
    let total: usize = expected.values().map(Vec::len).sum();
    assert!(total > 100, "too few boundary particles to be meaningful: {total}");
    for (grid, want) in &expected {
        assert_eq!(&got[grid], want, "ghosts of grid {grid}");
    }
}

#[test]
fn single_rank_needs_no_collectives_and_agrees() {
    let all = particles(800);
    let decomp = lattice(1);
    let expected = expected_ghosts(&decomp, &all);

    let mut pc = ParticleContainer::new(decomp, 0, NCELLS);
    for p in &all {
        pc.add_particle(*p).unwrap();
    }
    let stats = pc.fill_neighbors(&mut NoCollectives).unwrap();
    assert_eq!(stats.sent_bytes, 0);
    assert_eq!(ghosts_by_grid(&pc), expected);

    // Same ghost sets as the decomposed run
    assert_eq!(fill_on_ranks(3, all), expected);
}

#[test]
fn sort_keeps_every_real_particle() {
    let all = particles(300);
    let mut pc = ParticleContainer::new(lattice(1), 0, NCELLS);
    for p in &all {
        pc.add_particle(*p).unwrap();
    }
    let before: BTreeMap<usize, Vec<u64>> = pc
        .tiles()
        .map(|(k, t)| {
            let mut ids: Vec<u64> = t.real().iter().map(|p| p.id).collect();
            ids.sort();
            (k.grid, ids)
        })
        .collect();

    pc.sort_particles_by_neighbor_dest().unwrap();
    for (grid, ids) in before {
        let mut now: Vec<u64> = pc.tile(TileKey::grid(grid)).unwrap().real().iter().map(|p| p.id).collect();
        now.sort();
        assert_eq!(now, ids, "grid {grid}");
    }
}
