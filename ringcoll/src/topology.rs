//! Ring neighbour arithmetic.
//!
//! Everything here is a pure function of `(rank, world, offset)`, so
//! rotations can be computed independently on any task.

use crate::error::{RingError, Result};
use crate::types::Rank;

/// Successor of `rank` in the ring.
pub fn ring_next(rank: Rank, world: u32) -> Rank {
    ((rank as u64 + 1) % world as u64) as Rank
}

/// Predecessor of `rank` in the ring.
pub fn ring_prev(rank: Rank, world: u32) -> Rank {
    ((rank as u64 + world as u64 - 1) % world as u64) as Rank
}

pub fn check_world(world: u32) -> Result<()> {
    if world == 0 {
        return Err(RingError::InvalidWorld { world });
    }
    Ok(())
}

pub fn check_rank(rank: Rank, world: u32) -> Result<()> {
    check_world(world)?;
    if rank >= world {
        return Err(RingError::InvalidRank { rank, world });
    }
    Ok(())
}

pub fn check_ring_offset(offset: u32, world: u32) -> Result<()> {
    check_world(world)?;
    if offset >= world {
        return Err(RingError::InvalidRingOffset { offset, world });
    }
    Ok(())
}

/// One rotation of the ring as seen from `rank`.
///
/// In round `r` the worker forwards segment `send_index(r)` to its
/// successor and receives segment `recv_index(r)` from its predecessor.
/// `offset` shifts which segment the rotation starts from: with offset 0
/// a worker starts by sending its own segment, with offset 1 it starts
/// with its successor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    rank: Rank,
    world: u32,
    offset: u32,
}

impl Rotation {
    pub fn new(rank: Rank, world: u32, offset: u32) -> Result<Self> {
        check_rank(rank, world)?;
        check_ring_offset(offset, world)?;
        Ok(Self {
            rank,
            world,
            offset,
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world(&self) -> u32 {
        self.world
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn next(&self) -> Rank {
        ring_next(self.rank, self.world)
    }

    pub fn prev(&self) -> Rank {
        ring_prev(self.rank, self.world)
    }

    /// Segment index sent in `round`.
    pub fn send_index(&self, round: usize) -> usize {
        self.shifted(round, 0)
    }

    /// Segment index received in `round`.
    pub fn recv_index(&self, round: usize) -> usize {
        self.shifted(round, 1)
    }

    // (rank - round - back + offset) mod world, without underflow.
    fn shifted(&self, round: usize, back: u64) -> usize {
        let w = self.world as u64;
        let step = (round as u64 + back) % w;
        ((self.rank as u64 + w - step + self.offset as u64) % w) as usize
    }
}
