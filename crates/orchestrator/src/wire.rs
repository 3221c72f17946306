//! Byte layout of the ghost messages exchanged between ranks.
//!
//! One message per (source rank, destination rank) pair:
//!
//! ```text
//! MessageHeader { magic, version, num_groups }
//! repeat num_groups:
//!     GroupHeader { num_particles, dst_grid, dst_rank }
//!     num_particles x Particle
//! ```
//!
//! Every piece is `#[repr(C)]` + `Pod` and is written with native byte order.
//! Receive buffers are carved out of one contiguous allocation at arbitrary
//! byte offsets, so decoding only ever uses unaligned reads.

use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use kernel::Particle;

/// `b"GHST"` read as a little-endian `u32`.
pub const MESSAGE_MAGIC: u32 = 0x5453_4847;

/// Current layout version.
pub const WIRE_VERSION: u32 = 1;

/// Fixed header at the start of every message.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MessageHeader {
    /// Always [`MESSAGE_MAGIC`].
    pub magic: u32,
    /// Always [`WIRE_VERSION`].
    pub version: u32,
    /// Number of groups that follow.
    pub num_groups: u64,
}

/// Header of one run of particles bound for one grid.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GroupHeader {
    /// Number of particle records after this header.
    pub num_particles: u64,
    /// Grid whose ghost segment receives the particles.
    pub dst_grid: u32,
    /// Rank that owns `dst_grid`.
    pub dst_rank: u32,
}

/// Decoding failures. Any of them means sender and receiver disagree on the
/// layout or the bytes were cut short in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the headers announce.
    Truncated {
        /// Bytes required to read the next item.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// The message does not start with [`MESSAGE_MAGIC`].
    BadMagic(u32),
    /// The message was written with a different layout version.
    UnsupportedVersion(u32),
    /// Bytes left over after the last announced group.
    TrailingBytes(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { needed, available } => {
                write!(f, "truncated ghost message: needed {needed} bytes, {available} left")
            }
            WireError::BadMagic(m) => write!(f, "bad ghost message magic {m:#010x}"),
            WireError::UnsupportedVersion(v) => {
                write!(f, "unsupported ghost message version {v} (expected {WIRE_VERSION})")
            }
            WireError::TrailingBytes(n) => write!(f, "{n} trailing bytes after last ghost group"),
        }
    }
}

impl std::error::Error for WireError {}

/// Particles bound for one grid on the receiving rank.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostGroup {
    /// Destination grid id.
    pub dst_grid: u32,
    /// Destination rank id.
    pub dst_rank: u32,
    /// Particle records, positions already translated into the
    /// destination's periodic image.
    pub particles: Vec<Particle>,
}

/// All groups one rank sends to one other rank in an exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostMessage {
    /// Groups in send order.
    pub groups: Vec<GhostGroup>,
}

impl GhostMessage {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the message carries no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total particle records across all groups.
    pub fn num_particles(&self) -> usize {
        self.groups.iter().map(|g| g.particles.len()).sum()
    }

    /// Size of [`GhostMessage::encode`]'s output in bytes.
    pub fn encoded_len(&self) -> usize {
        size_of::<MessageHeader>()
            + self
                .groups
                .iter()
                .map(|g| size_of::<GroupHeader>() + g.particles.len() * size_of::<Particle>())
                .sum::<usize>()
    }

    /// Serialize into a freshly allocated byte buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let header = MessageHeader {
            magic: MESSAGE_MAGIC,
            version: WIRE_VERSION,
            num_groups: self.groups.len() as u64,
        };
        buf.extend_from_slice(bytemuck::bytes_of(&header));
        for group in &self.groups {
            let gh = GroupHeader {
                num_particles: group.particles.len() as u64,
                dst_grid: group.dst_grid,
                dst_rank: group.dst_rank,
            };
            buf.extend_from_slice(bytemuck::bytes_of(&gh));
            buf.extend_from_slice(bytemuck::cast_slice(&group.particles));
        }
        buf
    }

    /// Parse a buffer produced by [`GhostMessage::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader { bytes, pos: 0 };

        let header: MessageHeader = reader.read()?;
        if header.magic != MESSAGE_MAGIC {
            return Err(WireError::BadMagic(header.magic));
        }
        if header.version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(header.version));
        }

        let mut groups = Vec::new();
        for _ in 0..header.num_groups {
            let gh: GroupHeader = reader.read()?;
            let len = gh.num_particles as usize;
            let raw = reader.take(len.saturating_mul(size_of::<Particle>()))?;
            let particles = raw
                .chunks_exact(size_of::<Particle>())
                .map(bytemuck::pod_read_unaligned::<Particle>)
                .collect();
            groups.push(GhostGroup {
                dst_grid: gh.dst_grid,
                dst_rank: gh.dst_rank,
                particles,
            });
        }

        let rest = bytes.len() - reader.pos;
        if rest != 0 {
            return Err(WireError::TrailingBytes(rest));
        }
        Ok(Self { groups })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let available = self.bytes.len() - self.pos;
        if n > available {
            return Err(WireError::Truncated { needed: n, available });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read<T: Pod>(&mut self) -> Result<T, WireError> {
        self.take(size_of::<T>()).map(bytemuck::pod_read_unaligned::<T>)
    }
}
