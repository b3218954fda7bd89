use crate::collective::helpers::{recv_segment, ring_neighbors, send_segment};
use crate::error::{RingError, Result};
use crate::layout::uniform_segment;
use crate::topology::{Rotation, check_rank};
use crate::transport::{Channel, Communicator};

/// Ring allgather over fixed-size segments.
///
/// `data` is cut into `world` segments of `segment_size` bytes (clamped to
/// the buffer, so trailing segments may be short or empty). On entry each
/// rank's own segment holds its contribution; after `world` rounds every
/// segment `k` holds rank `k`'s contribution on every rank.
///
/// In round `r` this rank submits `segment(send_index(r))` to `next`, then
/// waits for `segment(recv_index(r))` from `prev`. Zero-length segments
/// still go through both steps to keep ranks in lockstep. The first failed
/// receive ends the call; later rounds are not attempted and `data` is
/// left partially gathered.
///
/// `ring_offset` shifts the segment each rank starts from. Offset 0
/// starts from the rank's own segment; [`super::ring_allreduce`] uses
/// offset 1 because after scatter-reduce rank `r` owns segment `r + 1`.
pub async fn ring_allgather(
    comm: &dyn Communicator,
    data: &mut [u8],
    segment_size: usize,
    ring_offset: u32,
    prev: &dyn Channel,
    next: &dyn Channel,
) -> Result<()> {
    let world = comm.world();
    let rot = Rotation::new(comm.rank(), world, ring_offset)?;
    if world == 1 {
        return Ok(());
    }

    let total = data.len();
    tracing::debug!(
        rank = rot.rank(),
        world,
        segment_size,
        ring_offset,
        bytes = total,
        "ring allgather"
    );

    for round in 0..world as usize {
        let send = uniform_segment(rot.send_index(round), segment_size, total);
        send_segment(comm, next, &data[send.range()], "allgather", round)?;

        let recv = uniform_segment(rot.recv_index(round), segment_size, total);
        recv_segment(comm, prev, &mut data[recv.range()], "allgather", round).await?;
    }

    Ok(())
}

/// [`ring_allgather`] on the default lane with offset 0.
pub async fn allgather(
    comm: &dyn Communicator,
    data: &mut [u8],
    segment_size: usize,
) -> Result<()> {
    check_rank(comm.rank(), comm.world())?;
    if comm.world() == 1 {
        return Ok(());
    }
    let n = ring_neighbors(comm, 0).await?;
    ring_allgather(comm, data, segment_size, 0, &*n.prev, &*n.next).await
}

/// Gather `local` from every rank into one rank-ordered vector.
///
/// Every rank must pass the same number of elements. A gathered result
/// whose size overflows `usize` is rejected with
/// [`RingError::BufferSizeMismatch`] before anything is sent.
pub async fn allgather_typed<T: bytemuck::Pod>(
    comm: &dyn Communicator,
    local: &[T],
) -> Result<Vec<T>> {
    let world = comm.world() as usize;
    let rank = comm.rank() as usize;
    check_rank(comm.rank(), comm.world())?;

    let count = local.len();
    let elem_size = std::mem::size_of::<T>();
    let total = count
        .checked_mul(world)
        .filter(|n| n.checked_mul(elem_size).is_some())
        .ok_or(RingError::BufferSizeMismatch {
            expected: usize::MAX / world,
            actual: count,
        })?;

    let mut out = vec![T::zeroed(); total];
    out[rank * count..(rank + 1) * count].copy_from_slice(local);

    if elem_size == 0 {
        // Nothing to move, but every rank still runs its rounds.
        allgather(comm, &mut [], 0).await?;
    } else {
        allgather(comm, bytemuck::cast_slice_mut(&mut out), count * elem_size).await?;
    }
    Ok(out)
}
