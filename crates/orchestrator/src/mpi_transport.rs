//! [`Transport`] over an MPI communicator (`mpi` feature).

use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::transport::{Transport, TransportError};

/// MPI-backed transport. Point-to-point tags come from a per-rank operation
/// counter, so every rank must issue the same sequence of exchanges.
pub struct MpiTransport {
    world: SimpleCommunicator,
    seq: i32,
}

impl MpiTransport {
    /// Wrap a communicator (usually `universe.world()`).
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world, seq: 0 }
    }

    fn next_tag(&mut self) -> i32 {
        // MPI guarantees tags up to at least 32767
        self.seq = (self.seq + 1) % 32767;
        self.seq
    }

    fn check_peer(&self, peer: usize) -> Result<i32, TransportError> {
        if peer >= self.num_ranks() || peer == self.rank() {
            return Err(TransportError::InvalidPeer { peer });
        }
        Ok(peer as i32)
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        self.world.size() as usize
    }

    fn all_reduce_max(&mut self, value: u64) -> Result<u64, TransportError> {
        let mut out = 0u64;
        self.world.all_reduce_into(&value, &mut out, SystemOperation::max());
        Ok(out)
    }

    fn all_to_all(&mut self, sends: &[u64]) -> Result<Vec<u64>, TransportError> {
        let n = self.num_ranks();
        if sends.len() != n {
            return Err(TransportError::BadLength {
                expected: n,
                found: sends.len(),
            });
        }
        let mut recvs = vec![0u64; n];
        self.world.all_to_all_into(sends, &mut recvs[..]);
        Ok(recvs)
    }

    fn exchange_bytes(
        &mut self,
        sends: &[(usize, Vec<u8>)],
        recvs: &mut [(usize, &mut [u8])],
    ) -> Result<(), TransportError> {
        let tag = self.next_tag();
        let mut recv_peers = Vec::with_capacity(recvs.len());
        for (src, _) in recvs.iter() {
            recv_peers.push(self.check_peer(*src)?);
        }
        let mut send_peers = Vec::with_capacity(sends.len());
        for (dst, _) in sends {
            send_peers.push(self.check_peer(*dst)?);
        }

        let world = &self.world;
        mpi::request::scope(|scope| {
            let requests: Vec<_> = recvs
                .iter_mut()
                .zip(&recv_peers)
                .map(|((_, buf), &src)| {
                    world
                        .process_at_rank(src)
                        .immediate_receive_into_with_tag(scope, &mut buf[..], tag)
                })
                .collect();

            for ((_, bytes), &dst) in sends.iter().zip(&send_peers) {
                world.process_at_rank(dst).send_with_tag(&bytes[..], tag);
            }

            for request in requests {
                request.wait();
            }
        });
        Ok(())
    }
}
