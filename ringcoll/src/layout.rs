//! Segment addressing into a flat buffer.
//!
//! Segments are `(offset, len)` pairs rather than sub-slices so that a
//! send segment and a receive segment of the same buffer can be computed
//! up front and borrowed one at a time.

use std::ops::Range;

/// A contiguous range of a shared buffer attributed to one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Segment `index` of a buffer of `total` units cut into `segment_size`
/// pieces. Clamped to the buffer, so trailing segments may be short or
/// empty.
pub fn uniform_segment(index: usize, segment_size: usize, total: usize) -> Segment {
    let start = index.saturating_mul(segment_size).min(total);
    let len = segment_size.min(total - start);
    Segment::new(start, len)
}

/// Elements per segment when `count` elements are split over `world`
/// segments: `ceil(count / world)`.
pub fn segment_len_for(count: usize, world: usize) -> usize {
    count.div_ceil(world.max(1))
}

/// Cumulative offsets for variable-size segments.
///
/// `world + 1` entries, exclusive prefix sum over the declared sizes:
/// `offsets[0] == 0` and `offsets[world] == total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: Vec<usize>,
}

impl OffsetTable {
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        let mut acc = 0usize;
        for &s in sizes {
            acc += s;
            offsets.push(acc);
        }
        debug_assert_eq!(offsets[0], 0);
        Self { offsets }
    }

    /// Number of ranks described by the table.
    pub fn world(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Sum of all declared sizes.
    pub fn total(&self) -> usize {
        self.offsets[self.world()]
    }

    pub fn segment(&self, rank: usize) -> Segment {
        let start = self.offsets[rank];
        Segment::new(start, self.offsets[rank + 1] - start)
    }

    pub fn size(&self, rank: usize) -> usize {
        self.segment(rank).len
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.offsets
    }
}
