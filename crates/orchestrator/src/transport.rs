//! Rank-to-rank communication used by the ghost exchange.
//!
//! The exchange needs only four primitives: a max-reduction, an all-to-all of
//! one integer per rank pair, and tagged point-to-point transfer of opaque
//! byte ranges into caller-provided receive slices. Every method is a
//! collective in the sense that all ranks must call it in the same order.

use std::fmt;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Communication failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A peer hung up before the operation completed.
    Disconnected {
        /// Rank on the other end.
        peer: usize,
    },
    /// A received payload did not match the size announced for it.
    SizeMismatch {
        /// Sending rank.
        peer: usize,
        /// Bytes the receiver reserved.
        expected: usize,
        /// Bytes that arrived.
        received: usize,
    },
    /// An operation named a rank outside `0..num_ranks`, or this rank itself.
    InvalidPeer {
        /// The offending rank id.
        peer: usize,
    },
    /// A peer's next message belongs to a different collective call.
    OutOfSequence {
        /// Sending rank.
        peer: usize,
        /// Sequence number this rank is at.
        expected: u64,
        /// Sequence number the message carried.
        found: u64,
    },
    /// A per-rank array had the wrong length.
    BadLength {
        /// Required length (the number of ranks).
        expected: usize,
        /// Length passed in.
        found: usize,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected { peer } => write!(f, "rank {peer} disconnected"),
            TransportError::SizeMismatch {
                peer,
                expected,
                received,
            } => write!(f, "rank {peer} sent {received} bytes, {expected} were announced"),
            TransportError::InvalidPeer { peer } => write!(f, "invalid peer rank {peer}"),
            TransportError::OutOfSequence { peer, expected, found } => write!(
                f,
                "rank {peer} sent a message for call {found} while this rank is at call {expected}"
            ),
            TransportError::BadLength { expected, found } => {
                write!(f, "per-rank array has {found} entries, expected {expected}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// A rank's view of the communicator.
pub trait Transport {
    /// This rank's id.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn num_ranks(&self) -> usize;

    /// Largest byte count a single point-to-point transfer may carry.
    fn max_message_len(&self) -> usize {
        i32::MAX as usize
    }

    /// Maximum of `value` over all ranks.
    fn all_reduce_max(&mut self, value: u64) -> Result<u64, TransportError>;

    /// Send `sends[r]` to rank `r`; return what every rank sent to this one.
    fn all_to_all(&mut self, sends: &[u64]) -> Result<Vec<u64>, TransportError>;

    /// Post a receive for every `(source, buffer)` in `recvs`, send every
    /// `(destination, bytes)` in `sends`, then wait for all receives.
    ///
    /// Each buffer must be exactly as long as the payload its source sends.
    fn exchange_bytes(&mut self, sends: &[(usize, Vec<u8>)], recvs: &mut [(usize, &mut [u8])])
        -> Result<(), TransportError>;
}

/// Single-rank communicator. Every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_reduce_max(&mut self, value: u64) -> Result<u64, TransportError> {
        Ok(value)
    }

    fn all_to_all(&mut self, sends: &[u64]) -> Result<Vec<u64>, TransportError> {
        if sends.len() != 1 {
            return Err(TransportError::BadLength {
                expected: 1,
                found: sends.len(),
            });
        }
        Ok(sends.to_vec())
    }

    fn exchange_bytes(
        &mut self,
        sends: &[(usize, Vec<u8>)],
        recvs: &mut [(usize, &mut [u8])],
    ) -> Result<(), TransportError> {
        if let Some(&(peer, _)) = sends.first() {
            return Err(TransportError::InvalidPeer { peer });
        }
        if let Some((peer, _)) = recvs.first() {
            return Err(TransportError::InvalidPeer { peer: *peer });
        }
        Ok(())
    }
}

struct Envelope {
    seq: u64,
    payload: Vec<u8>,
}

/// Channel endpoints of one rank pair, as seen from this rank.
struct Link {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
}

/// In-process communicator: one instance per rank, ranks run on threads and
/// talk over `crossbeam_channel` channels, one per ordered rank pair.
///
/// Each channel is FIFO and every rank calls the collectives in the same
/// order, so the next message from a peer always belongs to the current
/// call. Envelopes carry the caller's call counter and a mismatch is
/// reported instead of being delivered.
pub struct ChannelTransport {
    rank: usize,
    links: Vec<Option<Link>>,
    seq: u64,
    max_message_len: usize,
}

impl ChannelTransport {
    /// Create a fully connected set of `num_ranks` endpoints, indexed by rank.
    pub fn cluster(num_ranks: usize) -> Vec<Self> {
        assert!(num_ranks > 0, "cluster needs at least one rank");
        // channels[src][dst] carries messages from `src` to `dst`
        let mut channels: Vec<Vec<Option<(Sender<Envelope>, Receiver<Envelope>)>>> = (0..num_ranks)
            .map(|src| (0..num_ranks).map(|dst| (src != dst).then(unbounded)).collect())
            .collect();

        let mut endpoints: Vec<Vec<Option<Link>>> = (0..num_ranks).map(|_| Vec::with_capacity(num_ranks)).collect();
        for (me, links) in endpoints.iter_mut().enumerate() {
            for peer in 0..num_ranks {
                let link = match (&channels[me][peer], &channels[peer][me]) {
                    (Some((tx, _)), Some((_, rx))) => Some(Link {
                        tx: tx.clone(),
                        rx: rx.clone(),
                    }),
                    _ => None,
                };
                links.push(link);
            }
        }
        // Only the cloned ends stay alive, so a rank that exits disconnects its peers.
        channels.clear();

        endpoints
            .into_iter()
            .enumerate()
            .map(|(rank, links)| ChannelTransport {
                rank,
                links,
                seq: 0,
                max_message_len: i32::MAX as usize,
            })
            .collect()
    }

    /// Lower the per-transfer byte limit.
    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn link(&self, peer: usize) -> Result<&Link, TransportError> {
        self.links
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or(TransportError::InvalidPeer { peer })
    }

    fn send(&self, dst: usize, seq: u64, payload: Vec<u8>) -> Result<(), TransportError> {
        self.link(dst)?
            .tx
            .send(Envelope { seq, payload })
            .map_err(|_| TransportError::Disconnected { peer: dst })
    }

    fn recv(&self, src: usize, seq: u64) -> Result<Vec<u8>, TransportError> {
        let env = self
            .link(src)?
            .rx
            .recv()
            .map_err(|_| TransportError::Disconnected { peer: src })?;
        if env.seq != seq {
            return Err(TransportError::OutOfSequence {
                peer: src,
                expected: seq,
                found: env.seq,
            });
        }
        Ok(env.payload)
    }

    fn others(&self) -> impl Iterator<Item = usize> {
        let me = self.rank;
        (0..self.links.len()).filter(move |&r| r != me)
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.links.len()
    }

    fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    fn all_reduce_max(&mut self, value: u64) -> Result<u64, TransportError> {
        let seq = self.next_seq();
        for r in self.others() {
            self.send(r, seq, value.to_ne_bytes().to_vec())?;
        }
        let mut max = value;
        for r in self.others() {
            let bytes = self.recv(r, seq)?;
            max = max.max(decode_word(r, &bytes)?);
        }
        Ok(max)
    }

    fn all_to_all(&mut self, sends: &[u64]) -> Result<Vec<u64>, TransportError> {
        if sends.len() != self.num_ranks() {
            return Err(TransportError::BadLength {
                expected: self.num_ranks(),
                found: sends.len(),
            });
        }
        let seq = self.next_seq();
        for r in self.others() {
            self.send(r, seq, sends[r].to_ne_bytes().to_vec())?;
        }
        let mut out = vec![0u64; self.num_ranks()];
        out[self.rank] = sends[self.rank];
        for r in self.others() {
            let bytes = self.recv(r, seq)?;
            out[r] = decode_word(r, &bytes)?;
        }
        Ok(out)
    }

    fn exchange_bytes(
        &mut self,
        sends: &[(usize, Vec<u8>)],
        recvs: &mut [(usize, &mut [u8])],
    ) -> Result<(), TransportError> {
        let seq = self.next_seq();
        for (dst, bytes) in sends {
            self.send(*dst, seq, bytes.clone())?;
        }
        for (src, buf) in recvs.iter_mut() {
            let payload = self.recv(*src, seq)?;
            if payload.len() != buf.len() {
                return Err(TransportError::SizeMismatch {
                    peer: *src,
                    expected: buf.len(),
                    received: payload.len(),
                });
            }
            buf.copy_from_slice(&payload);
        }
        Ok(())
    }
}

fn decode_word(peer: usize, bytes: &[u8]) -> Result<u64, TransportError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| TransportError::SizeMismatch {
        peer,
        expected: 8,
        received: bytes.len(),
    })?;
    Ok(u64::from_ne_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_ranks<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(ChannelTransport) -> T + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = ChannelTransport::cluster(n)
            .into_iter()
            .map(|t| {
                let f = f.clone();
                thread::spawn(move || f(t))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn local_transport_is_identity() {
        let mut t = LocalTransport;
        assert_eq!(t.all_reduce_max(7).unwrap(), 7);
        assert_eq!(t.all_to_all(&[3]).unwrap(), vec![3]);
        assert!(t.exchange_bytes(&[], &mut []).is_ok());
        assert_eq!(
            t.exchange_bytes(&[(0, vec![1])], &mut []).unwrap_err(),
            TransportError::InvalidPeer { peer: 0 }
        );
    }

    #[test]
    fn reduce_max_across_ranks() {
        let out = on_ranks(4, |mut t| t.all_reduce_max(t.rank() as u64 * 10).unwrap());
        assert_eq!(out, vec![30; 4]);
    }

    #[test]
    fn all_to_all_transposes() {
        let out = on_ranks(3, |mut t| {
            let me = t.rank() as u64;
            let sends: Vec<u64> = (0..3).map(|r| me * 10 + r).collect();
            t.all_to_all(&sends).unwrap()
        });
        assert_eq!(out[0], vec![0, 10, 20]);
        assert_eq!(out[1], vec![1, 11, 21]);
        assert_eq!(out[2], vec![2, 12, 22]);
    }

    #[test]
    fn point_to_point_ring() {
        let out = on_ranks(3, |mut t| {
            let me = t.rank();
            let next = (me + 1) % 3;
            let prev = (me + 2) % 3;
            let payload = vec![me as u8; me + 1];
            let mut buf = vec![0u8; prev + 1];
            t.exchange_bytes(&[(next, payload)], &mut [(prev, &mut buf[..])]).unwrap();
            buf
        });
        assert_eq!(out[0], vec![2, 2, 2]);
        assert_eq!(out[1], vec![0]);
        assert_eq!(out[2], vec![1, 1]);
    }

    #[test]
    fn back_to_back_collectives_stay_ordered() {
        // Rank 1 may run both reductions before rank 0 reads the first;
        // per-pair FIFO order keeps the payloads apart.
        let out = on_ranks(2, |mut t| {
            let a = t.all_reduce_max(t.rank() as u64 + 1).unwrap();
            let b = t.all_reduce_max(100 - t.rank() as u64).unwrap();
            (a, b)
        });
        assert_eq!(out, vec![(2, 100), (2, 100)]);
    }

    #[test]
    fn unmatched_message_is_caught_by_the_next_call() {
        let out = on_ranks(2, |mut t| {
            // Rank 0 sends a payload rank 1 never posted a receive for
            let sends = if t.rank() == 0 { vec![(1, vec![7u8])] } else { Vec::new() };
            t.exchange_bytes(&sends, &mut []).unwrap();
            t.all_reduce_max(1)
        });
        assert_eq!(out[0], Ok(1));
        assert_eq!(
            out[1],
            Err(TransportError::OutOfSequence {
                peer: 0,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn size_mismatch_is_reported() {
        let out = on_ranks(2, |mut t| {
            let other = 1 - t.rank();
            let mut buf = vec![0u8; 2];
            t.exchange_bytes(&[(other, vec![1, 2, 3])], &mut [(other, &mut buf[..])])
        });
        for r in out {
            assert!(matches!(r, Err(TransportError::SizeMismatch { expected: 2, received: 3, .. })));
        }
    }
}
