//! Malformed or misaddressed messages and oversized buffers.
//!
//! Rank 0 of a two-rank job talks to a scripted peer that delivers a fixed
//! payload, so every check on the receive path can be hit directly.

use kernel::{Geometry, IntBox, Particle};
use orchestrator::{
    BoxArray, Decomposition, DistributionMapping, GhostGroup, GhostMessage, NeighborError, ParticleContainer,
    Transport, TransportError, WireError,
};

fn two_grids_two_ranks() -> Decomposition {
    let domain = IntBox::new([0; 3], [7, 3, 3]);
    let geom = Geometry::new([0.0; 3], [8.0, 4.0, 4.0], domain, [true; 3]);
    let ba = BoxArray::chop(&domain, 4);
    Decomposition::new(geom, ba, DistributionMapping::round_robin(2, 2))
}

/// Rank 0's view of a peer (rank 1) that always sends `payload`.
struct ScriptedPeer {
    payload: Vec<u8>,
    limit: usize,
    sent: Vec<(usize, usize)>,
}

impl ScriptedPeer {
    fn delivering(payload: Vec<u8>) -> Self {
        Self {
            payload,
            limit: i32::MAX as usize,
            sent: Vec::new(),
        }
    }
}

impl Transport for ScriptedPeer {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        2
    }

    fn max_message_len(&self) -> usize {
        self.limit
    }

    fn all_reduce_max(&mut self, value: u64) -> Result<u64, TransportError> {
        Ok(value.max(self.payload.len() as u64))
    }

    fn all_to_all(&mut self, sends: &[u64]) -> Result<Vec<u64>, TransportError> {
        assert_eq!(sends.len(), 2);
        Ok(vec![0, self.payload.len() as u64])
    }

    fn exchange_bytes(
        &mut self,
        sends: &[(usize, Vec<u8>)],
        recvs: &mut [(usize, &mut [u8])],
    ) -> Result<(), TransportError> {
        self.sent.extend(sends.iter().map(|(dst, bytes)| (*dst, bytes.len())));
        for (src, buf) in recvs.iter_mut() {
            assert_eq!(*src, 1);
            buf.copy_from_slice(&self.payload);
        }
        Ok(())
    }
}

fn message(dst_grid: u32, dst_rank: u32) -> Vec<u8> {
    GhostMessage {
        groups: vec![GhostGroup {
            dst_grid,
            dst_rank,
            particles: vec![Particle::new(5, 1, [4.5, 1.5, 1.5])],
        }],
    }
    .encode()
}

#[test]
fn well_addressed_group_is_appended() {
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    let mut peer = ScriptedPeer::delivering(message(0, 0));
    let stats = pc.fill_neighbors(&mut peer).unwrap();
    assert_eq!(stats.received_particles, 1);
    assert_eq!(pc.num_ghosts(), 1);
    assert!(peer.sent.is_empty());
}

#[test]
fn group_for_another_rank_is_rejected() {
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    let mut peer = ScriptedPeer::delivering(message(0, 1));
    assert!(matches!(
        pc.fill_neighbors(&mut peer),
        Err(NeighborError::RankMismatch {
            src_rank: 1,
            expected: 0,
            found: 1
        })
    ));
}

#[test]
fn group_for_a_foreign_grid_is_rejected() {
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    let mut peer = ScriptedPeer::delivering(message(1, 0));
    assert!(matches!(
        pc.fill_neighbors(&mut peer),
        Err(NeighborError::UnknownGrid { src_rank: 1, grid: 1 })
    ));
}

#[test]
fn corrupt_payload_is_rejected() {
    let mut bytes = message(0, 0);
    bytes[0] ^= 0xff;
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    let mut peer = ScriptedPeer::delivering(bytes);
    assert!(matches!(
        pc.fill_neighbors(&mut peer),
        Err(NeighborError::Wire {
            src_rank: 1,
            source: WireError::BadMagic(_)
        })
    ));
}

#[test]
fn oversized_send_fails_before_any_transfer() {
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    // High-x boundary of grid 0 goes to grid 1 on rank 1
    pc.add_particle(Particle::new(1, 0, [3.5, 1.5, 1.5])).unwrap();
    let mut peer = ScriptedPeer::delivering(Vec::new());
    peer.limit = 16;
    assert!(matches!(
        pc.fill_neighbors(&mut peer),
        Err(NeighborError::MessageTooLarge {
            dst_rank: 1,
            limit: 16,
            ..
        })
    ));
    assert!(peer.sent.is_empty());
}

#[test]
fn outgoing_message_is_sent_to_the_owner() {
    let mut pc = ParticleContainer::new(two_grids_two_ranks(), 0, 1);
    pc.add_particle(Particle::new(1, 0, [3.5, 1.5, 1.5])).unwrap();
    let mut peer = ScriptedPeer::delivering(Vec::new());
    let stats = pc.fill_neighbors(&mut peer).unwrap();
    let expected = 16 + 16 + std::mem::size_of::<Particle>();
    assert_eq!(peer.sent, vec![(1, expected)]);
    assert_eq!(stats.sent_bytes, expected);
    assert_eq!(stats.received_particles, 0);
}
