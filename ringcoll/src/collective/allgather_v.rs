use crate::collective::allgather::allgather;
use crate::collective::helpers::{recv_segment, send_segment};
use crate::error::{RingError, Result};
use crate::layout::OffsetTable;
use crate::topology::{Rotation, check_rank, ring_next, ring_prev};
use crate::transport::Communicator;

/// Bytes used to announce one rank's contribution length.
const SIZE_PREFIX_BYTES: usize = std::mem::size_of::<u64>();

/// Ring allgather over variable-size segments.
///
/// `sizes[k]` is the number of bytes rank `k` contributes; every rank
/// must pass the same `sizes`. `local` is this rank's contribution and
/// `out` receives the rank-ordered concatenation of all contributions.
///
/// Channels are always the default-lane neighbours and the rotation
/// always starts at offset 0. After the last round the whole
/// communicator is settled with [`Communicator::block`], so every send
/// this worker has in flight on any channel has been written before the
/// call returns.
///
/// Returns the offset table the output was laid out with.
pub async fn ring_allgather_v(
    comm: &dyn Communicator,
    sizes: &[usize],
    local: &[u8],
    out: &mut [u8],
) -> Result<OffsetTable> {
    let world = comm.world();
    let rank = comm.rank();
    check_rank(rank, world)?;

    if sizes.len() != world as usize {
        return Err(RingError::SizeCountMismatch {
            expected: world as usize,
            actual: sizes.len(),
        });
    }
    if local.len() != sizes[rank as usize] {
        return Err(RingError::BufferSizeMismatch {
            expected: sizes[rank as usize],
            actual: local.len(),
        });
    }

    // A sum that overflows can never match a real buffer.
    let total = sizes.iter().try_fold(0usize, |acc, &s| acc.checked_add(s));
    if total != Some(out.len()) {
        return Err(RingError::BufferSizeMismatch {
            expected: total.unwrap_or(usize::MAX),
            actual: out.len(),
        });
    }
    let table = OffsetTable::from_sizes(sizes);

    out[table.segment(rank as usize).range()].copy_from_slice(local);
    if world == 1 {
        return Ok(table);
    }

    tracing::debug!(rank, world, bytes = table.total(), "ring allgather-v");

    let (prev, next) = tokio::try_join!(
        comm.channel(ring_prev(rank, world)),
        comm.channel(ring_next(rank, world)),
    )?;

    let rot = Rotation::new(rank, world, 0)?;
    for round in 0..world as usize {
        let send = table.segment(rot.send_index(round));
        send_segment(comm, &*next, &out[send.range()], "allgather_v", round)?;

        let recv = table.segment(rot.recv_index(round));
        recv_segment(comm, &*prev, &mut out[recv.range()], "allgather_v", round).await?;
    }

    comm.block().await?;
    Ok(table)
}

/// Gather a variable-size contribution from every rank without knowing
/// the sizes up front.
///
/// Runs a fixed-size allgather of every rank's length first, then
/// [`ring_allgather_v`]. Returns the concatenated bytes and their offset
/// table.
pub async fn allgather_v(comm: &dyn Communicator, local: &[u8]) -> Result<(Vec<u8>, OffsetTable)> {
    let world = comm.world() as usize;
    let rank = comm.rank() as usize;
    check_rank(comm.rank(), comm.world())?;

    let mut lengths = vec![0u8; world * SIZE_PREFIX_BYTES];
    lengths[rank * SIZE_PREFIX_BYTES..(rank + 1) * SIZE_PREFIX_BYTES]
        .copy_from_slice(&(local.len() as u64).to_le_bytes());
    allgather(comm, &mut lengths, SIZE_PREFIX_BYTES).await?;

    let sizes = lengths
        .chunks_exact(SIZE_PREFIX_BYTES)
        .map(|c| {
            let mut b = [0u8; SIZE_PREFIX_BYTES];
            b.copy_from_slice(c);
            usize::try_from(u64::from_le_bytes(b))
                .map_err(|_| RingError::transport("announced segment size overflows usize"))
        })
        .collect::<Result<Vec<usize>>>()?;

    let total = sizes
        .iter()
        .try_fold(0usize, |acc, &s| acc.checked_add(s))
        .ok_or_else(|| RingError::transport("announced segment sizes overflow usize"))?;
    let mut out = vec![0u8; total];
    let table = ring_allgather_v(comm, &sizes, local, &mut out).await?;
    Ok((out, table))
}
