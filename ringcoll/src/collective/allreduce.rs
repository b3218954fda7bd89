use crate::collective::allgather::ring_allgather;
use crate::collective::helpers::{recv_segment, ring_neighbors, send_segment};
use crate::error::Result;
use crate::layout::{segment_len_for, uniform_segment};
use crate::reduce::{Reducible, reduce_into};
use crate::topology::{Rotation, check_rank};
use crate::transport::{Channel, Communicator};
use crate::types::ReduceOp;

/// Ring allreduce with a caller-supplied combine operator.
///
/// Algorithm:
/// 1. Scatter-reduce: `world - 1` rounds. Each rank sends one segment to
///    `next`, receives one segment from `prev` into scratch space and
///    folds it into its own copy with `op(incoming, accumulator)`. After
///    the last round rank `r` holds the fully combined segment `r + 1`.
/// 2. Allgather: [`super::ring_allgather`] with ring offset 1 spreads the
///    combined segments to every rank.
///
/// `op` must be associative and commutative across ranks; nothing checks
/// this. Each rank starts folding at a different point of the ring, so
/// a merely approximately associative operator (float addition) can round
/// differently on different ranks.
///
/// On error `data` is partially combined and must be discarded.
pub async fn ring_allreduce<T, F>(
    comm: &dyn Communicator,
    data: &mut [T],
    prev: &dyn Channel,
    next: &dyn Channel,
    mut op: F,
) -> Result<()>
where
    T: bytemuck::Pod,
    F: FnMut(&[T], &mut [T]),
{
    let world = comm.world();
    let rot = Rotation::new(comm.rank(), world, 0)?;
    if world == 1 {
        return Ok(());
    }

    let count = data.len();
    let seg_len = segment_len_for(count, world as usize);
    let elem_size = std::mem::size_of::<T>();
    tracing::debug!(
        rank = rot.rank(),
        world,
        count,
        elem_size,
        "ring allreduce"
    );

    let mut scratch = vec![T::zeroed(); seg_len];

    // Phase 1: scatter-reduce.
    for round in 0..(world - 1) as usize {
        let send = uniform_segment(rot.send_index(round), seg_len, count);
        send_segment(
            comm,
            next,
            bytemuck::cast_slice(&data[send.range()]),
            "allreduce",
            round,
        )?;

        let recv = uniform_segment(rot.recv_index(round), seg_len, count);
        let incoming = &mut scratch[..recv.len];
        recv_segment(
            comm,
            prev,
            bytemuck::cast_slice_mut(&mut *incoming),
            "allreduce",
            round,
        )
        .await?;
        op(incoming, &mut data[recv.range()]);
    }

    // Phase 2: allgather of the combined segments.
    ring_allgather(
        comm,
        bytemuck::cast_slice_mut(data),
        seg_len * elem_size,
        1,
        prev,
        next,
    )
    .await
}

/// [`ring_allreduce`] on the default-lane neighbours.
pub async fn allreduce<T, F>(comm: &dyn Communicator, data: &mut [T], op: F) -> Result<()>
where
    T: bytemuck::Pod,
    F: FnMut(&[T], &mut [T]),
{
    check_rank(comm.rank(), comm.world())?;
    if comm.world() == 1 {
        return Ok(());
    }
    let n = ring_neighbors(comm, 0).await?;
    ring_allreduce(comm, data, &*n.prev, &*n.next, op).await
}

/// Allreduce with one of the built-in [`ReduceOp`]s.
pub async fn allreduce_op<T: Reducible>(
    comm: &dyn Communicator,
    data: &mut [T],
    op: ReduceOp,
) -> Result<()> {
    allreduce(comm, data, |incoming, acc| reduce_into(acc, incoming, op)).await
}
