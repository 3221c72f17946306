//! Ghost exchange and redistribution.
//!
//! Every exchange is `clear -> (sort) -> exchange`. The exchange appends a
//! copy of each non-empty region run to the ghost segment of every grid in
//! that region's neighbor table: directly when the destination grid lives on
//! this rank, otherwise through one packed message per destination rank.
//!
//! Collective calls, in order, when more than one rank is present:
//! `all_reduce_max` of the bytes to send (everyone stops here if it is zero),
//! `all_to_all` of the per-rank byte counts, then one `exchange_bytes`.
//! A single rank never touches the transport, and any particle routed to
//! a rank the transport lacks is an error.

use std::collections::BTreeMap;

use kernel::{sort_by_region, Particle, ParticleTile};

use crate::container::{ParticleContainer, TileKey};
use crate::error::NeighborError;
use crate::pipeline::{ExchangePipeline, ExchangeStage};
use crate::transport::Transport;
use crate::wire::{GhostGroup, GhostMessage};

/// Counters of one exchange call on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    /// Particles copied between grids of this rank.
    pub local_particles: usize,
    /// Particles packed for other ranks.
    pub sent_particles: usize,
    /// Encoded bytes sent.
    pub sent_bytes: usize,
    /// Particles received from other ranks.
    pub received_particles: usize,
    /// Encoded bytes received.
    pub received_bytes: usize,
}

impl ExchangeStats {
    /// Add another call's counters to these.
    pub fn accumulate(&mut self, other: &ExchangeStats) {
        self.local_particles += other.local_particles;
        self.sent_particles += other.sent_particles;
        self.sent_bytes += other.sent_bytes;
        self.received_particles += other.received_particles;
        self.received_bytes += other.received_bytes;
    }
}

/// Messages received in one transfer, tagged with their source rank.
struct Delivered {
    messages: Vec<(usize, GhostMessage)>,
    sent_bytes: usize,
    received_bytes: usize,
}

impl ParticleContainer {
    /// Reset every ghost segment to zero length, keeping its storage.
    pub fn clear_neighbors(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.clear_ghosts();
        }
    }

    /// Sort each local grid's real particles by region code and record the
    /// runs for the exchange.
    ///
    /// Reorders real particles, so any neighbor list is discarded.
    pub fn sort_particles_by_neighbor_dest(&mut self) -> Result<(), NeighborError> {
        self.build_region_mask()?;
        let Some(masks) = self.masks.as_ref() else {
            return Ok(());
        };
        let geom = self.decomp.geom();
        for (key, tile) in self.tiles.iter_mut() {
            let Some(regions) = masks.get(key.grid) else {
                continue;
            };
            let runs = sort_by_region(tile.real_mut(), &regions.mask, geom, regions.num_codes())
                .map_err(|source| NeighborError::OutsideMask { grid: key.grid, source })?;
            self.runs.insert(key.grid, runs);
        }
        self.lists.clear();
        Ok(())
    }

    /// Rebuild every ghost segment: clear, sort by region, exchange.
    pub fn fill_neighbors<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<ExchangeStats, NeighborError> {
        let mut pipeline = ExchangePipeline::begin("fill_neighbors", self.rank);
        self.clear_neighbors();
        pipeline.checkpoint(ExchangeStage::Cleared);
        self.sort_particles_by_neighbor_dest()?;
        pipeline.checkpoint(ExchangeStage::Sorted);
        self.exchange_ghosts(transport, &mut pipeline)
    }

    /// Rebuild every ghost segment from the runs of the last sort.
    ///
    /// Real particles may have moved since, but none may have been added,
    /// removed or reordered. Ghosts come out in the same order as in the
    /// last exchange, so neighbor lists built since stay valid.
    pub fn update_neighbors<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<ExchangeStats, NeighborError> {
        let mut pipeline = ExchangePipeline::begin("update_neighbors", self.rank);
        self.build_region_mask()?;
        self.clear_neighbors();
        pipeline.checkpoint(ExchangeStage::Cleared);
        self.exchange_ghosts(transport, &mut pipeline)
    }

    fn exchange_ghosts<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        pipeline: &mut ExchangePipeline,
    ) -> Result<ExchangeStats, NeighborError> {
        let me = self.rank;
        let mut stats = ExchangeStats::default();

        // --- 1. Collect copies: local appends and per-rank messages ---
        let mut local: Vec<(usize, Vec<Particle>)> = Vec::new();
        let mut outgoing: BTreeMap<usize, GhostMessage> = BTreeMap::new();
        {
            let Some(masks) = self.masks.as_ref() else {
                return Ok(stats);
            };
            let geom = self.decomp.geom();
            let dmap = self.decomp.dmap();
            for (key, tile) in &self.tiles {
                let grid = key.grid;
                let runs = self.runs.get(&grid).ok_or(NeighborError::MissingSortRuns { grid })?;
                if runs.num_particles() != tile.num_real() {
                    return Err(NeighborError::StaleSortRuns {
                        grid,
                        sorted: runs.num_particles(),
                        now: tile.num_real(),
                    });
                }
                let Some(regions) = masks.get(grid) else {
                    continue;
                };
                for (code, range) in runs.exported() {
                    for target in regions.targets(code) {
                        let offset = geom.shift_offset(target.shift);
                        let copies: Vec<Particle> = tile.real()[range.clone()]
                            .iter()
                            .map(|p| translated(p, offset))
                            .collect();
                        let owner = dmap.owner(target.grid);
                        if owner == me {
                            local.push((target.grid, copies));
                        } else {
                            outgoing.entry(owner).or_default().groups.push(GhostGroup {
                                dst_grid: target.grid as u32,
                                dst_rank: owner as u32,
                                particles: copies,
                            });
                        }
                    }
                }
            }
        }

        check_routes(&outgoing, transport.num_ranks())?;

        // --- 2. Same-rank copies ---
        for (grid, copies) in local {
            let tile = self
                .tiles
                .get_mut(&TileKey::grid(grid))
                .ok_or(NeighborError::UnknownGrid { src_rank: me, grid })?;
            stats.local_particles += copies.len();
            tile.append_ghosts(&copies);
        }
        pipeline.checkpoint(ExchangeStage::LocalCopied);

        // --- 3. Cross-rank transfer ---
        if transport.num_ranks() > 1 {
            stats.sent_particles = outgoing.values().map(GhostMessage::num_particles).sum();
            let delivered = transfer(transport, outgoing, pipeline)?;
            stats.sent_bytes = delivered.sent_bytes;
            stats.received_bytes = delivered.received_bytes;
            for (src, msg) in delivered.messages {
                for group in msg.groups {
                    let tile = self.checked_destination(src, &group)?;
                    stats.received_particles += group.particles.len();
                    tile.append_ghosts(&group.particles);
                }
            }
            if pipeline.reached(ExchangeStage::Packed) {
                pipeline.checkpoint(ExchangeStage::Unpacked);
            }
        }

        tracing::debug!(
            "rank {}: ghosts local={} sent={} ({} B) received={} ({} B)",
            me,
            stats.local_particles,
            stats.sent_particles,
            stats.sent_bytes,
            stats.received_particles,
            stats.received_bytes
        );
        Ok(stats)
    }

    /// Move every owned particle that left its grid to the grid now
    /// containing it, on this rank or another.
    ///
    /// Positions on periodic axes are first mapped back into the domain.
    /// Ghosts, sort runs and neighbor lists are dropped.
    pub fn redistribute<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<ExchangeStats, NeighborError> {
        let me = self.rank;
        let mut pipeline = ExchangePipeline::begin("redistribute", me);
        let mut stats = ExchangeStats::default();
        self.clear_neighbors();
        self.runs.clear();
        self.lists.clear();
        pipeline.checkpoint(ExchangeStage::Cleared);

        // --- 1. Pull out particles whose cell is no longer in their grid ---
        let mut leaving: Vec<Particle> = Vec::new();
        for (key, tile) in self.tiles.iter_mut() {
            let bx = *self.decomp.grids().get(key.grid);
            let geom = self.decomp.geom();
            for p in tile.real_mut() {
                p.pos = geom.periodic_image(p.pos);
            }
            leaving.extend(tile.drain_real_where(|p| !bx.contains(geom.cell_index(p.pos))));
        }

        let mut local: Vec<(usize, Particle)> = Vec::new();
        let mut outgoing: BTreeMap<usize, BTreeMap<usize, Vec<Particle>>> = BTreeMap::new();
        for p in leaving {
            let grid = self
                .decomp
                .grid_of_position(p.pos)
                .ok_or(NeighborError::ParticleOutsideDomain {
                    particle: p.key(),
                    pos: p.pos,
                })?;
            let owner = self.decomp.dmap().owner(grid);
            if owner == me {
                local.push((grid, p));
            } else {
                outgoing.entry(owner).or_default().entry(grid).or_default().push(p);
            }
        }

        check_routes(&outgoing, transport.num_ranks())?;

        for (grid, p) in local {
            let tile = self
                .tiles
                .get_mut(&TileKey::grid(grid))
                .ok_or(NeighborError::GridNotLocal { grid, rank: me })?;
            tile.push_real(p);
            stats.local_particles += 1;
        }
        pipeline.checkpoint(ExchangeStage::LocalCopied);

        // --- 2. Ship the rest, one group per destination grid ---
        if transport.num_ranks() > 1 {
            let messages: BTreeMap<usize, GhostMessage> = outgoing
                .into_iter()
                .map(|(owner, by_grid)| {
                    let groups = by_grid
                        .into_iter()
                        .map(|(grid, particles)| GhostGroup {
                            dst_grid: grid as u32,
                            dst_rank: owner as u32,
                            particles,
                        })
                        .collect();
                    (owner, GhostMessage { groups })
                })
                .collect();
            stats.sent_particles = messages.values().map(GhostMessage::num_particles).sum();
            let delivered = transfer(transport, messages, &mut pipeline)?;
            stats.sent_bytes = delivered.sent_bytes;
            stats.received_bytes = delivered.received_bytes;
            for (src, msg) in delivered.messages {
                for group in msg.groups {
                    let tile = self.checked_destination(src, &group)?;
                    stats.received_particles += group.particles.len();
                    tile.extend_real(&group.particles);
                }
            }
            if pipeline.reached(ExchangeStage::Packed) {
                pipeline.checkpoint(ExchangeStage::Unpacked);
            }
        }

        tracing::debug!(
            "rank {}: redistributed local={} sent={} received={}",
            me,
            stats.local_particles,
            stats.sent_particles,
            stats.received_particles
        );
        Ok(stats)
    }

    /// Tile a received group is addressed to, after checking the header.
    fn checked_destination(&mut self, src: usize, group: &GhostGroup) -> Result<&mut ParticleTile, NeighborError> {
        if group.dst_rank as usize != self.rank {
            return Err(NeighborError::RankMismatch {
                src_rank: src,
                expected: self.rank,
                found: group.dst_rank as usize,
            });
        }
        let grid = group.dst_grid as usize;
        self.tiles
            .get_mut(&TileKey::grid(grid))
            .ok_or(NeighborError::UnknownGrid { src_rank: src, grid })
    }
}

/// Every destination rank must exist in the transport; a single rank has
/// no peers at all.
fn check_routes<V>(outgoing: &BTreeMap<usize, V>, num_ranks: usize) -> Result<(), NeighborError> {
    match outgoing.keys().find(|&&r| r >= num_ranks) {
        Some(&dst_rank) => Err(NeighborError::RankOutOfRange { dst_rank, num_ranks }),
        None => Ok(()),
    }
}

fn translated(p: &Particle, offset: [f64; 3]) -> Particle {
    let mut q = *p;
    for d in 0..3 {
        q.pos[d] += offset[d];
    }
    q
}

/// Encode, size-exchange, send and decode one round of messages.
///
/// Every rank must call this, with or without anything to send.
fn transfer<T: Transport + ?Sized>(
    transport: &mut T,
    outgoing: BTreeMap<usize, GhostMessage>,
    pipeline: &mut ExchangePipeline,
) -> Result<Delivered, NeighborError> {
    let me = transport.rank();
    let num_ranks = transport.num_ranks();
    let limit = transport.max_message_len();

    // --- 1. Encode ---
    let mut sends: Vec<(usize, Vec<u8>)> = Vec::with_capacity(outgoing.len());
    let mut send_sizes = vec![0u64; num_ranks];
    for (dst, msg) in outgoing {
        if msg.is_empty() {
            continue;
        }
        let bytes = msg.encode();
        if bytes.len() > limit {
            return Err(NeighborError::MessageTooLarge {
                dst_rank: dst,
                bytes: bytes.len(),
                limit,
            });
        }
        send_sizes[dst] = bytes.len() as u64;
        sends.push((dst, bytes));
    }
    let sent_bytes: usize = sends.iter().map(|(_, b)| b.len()).sum();
    pipeline.checkpoint(ExchangeStage::Packed);

    let mut delivered = Delivered {
        messages: Vec::new(),
        sent_bytes,
        received_bytes: 0,
    };

    // --- 2. Skip the whole round if nobody sends ---
    let global_max = transport.all_reduce_max(sent_bytes as u64)?;
    if global_max == 0 {
        return Ok(delivered);
    }

    // --- 3. Announce sizes and lay out one receive buffer ---
    let recv_sizes = transport.all_to_all(&send_sizes)?;
    let mut layout: Vec<(usize, usize, usize)> = Vec::new();
    let mut total = 0usize;
    for (src, &n) in recv_sizes.iter().enumerate() {
        if n == 0 || src == me {
            continue;
        }
        let n = n as usize;
        if n > limit {
            return Err(NeighborError::MessageTooLarge {
                dst_rank: me,
                bytes: n,
                limit,
            });
        }
        layout.push((src, total, n));
        total += n;
    }
    pipeline.checkpoint(ExchangeStage::SizesAnnounced);

    // --- 4. Post receives, send, wait ---
    let mut recv_buffer = vec![0u8; total];
    {
        let mut slices: Vec<(usize, &mut [u8])> = Vec::with_capacity(layout.len());
        let mut rest: &mut [u8] = &mut recv_buffer;
        for &(src, _, n) in &layout {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            slices.push((src, head));
            rest = tail;
        }
        transport.exchange_bytes(&sends, &mut slices)?;
    }
    pipeline.checkpoint(ExchangeStage::Transferred);

    // --- 5. Decode each sender's portion ---
    for (src, offset, n) in layout {
        let msg = GhostMessage::decode(&recv_buffer[offset..offset + n])
            .map_err(|source| NeighborError::Wire { src_rank: src, source })?;
        delivered.messages.push((src, msg));
    }
    delivered.received_bytes = total;
    Ok(delivered)
}
