use crate::error::{RingError, Result};
use crate::topology::{ring_next, ring_prev};
use crate::transport::{Channel, Communicator};
use crate::types::Lane;
use std::sync::Arc;

/// The two channels one ring rotation talks to.
#[derive(Clone)]
pub struct RingNeighbors {
    pub prev: Arc<dyn Channel>,
    pub next: Arc<dyn Channel>,
}

/// Resolve the predecessor and successor channels on `lane`.
///
/// Rotations that should run concurrently must use different lanes so
/// they never share an edge.
pub async fn ring_neighbors(comm: &dyn Communicator, lane: Lane) -> Result<RingNeighbors> {
    let rank = comm.rank();
    let world = comm.world();
    let (prev, next) = tokio::try_join!(
        comm.channel_on(ring_prev(rank, world), lane),
        comm.channel_on(ring_next(rank, world), lane),
    )?;
    Ok(RingNeighbors { prev, next })
}

/// Submit one round's outgoing segment.
pub(crate) fn send_segment(
    comm: &dyn Communicator,
    next: &dyn Channel,
    data: &[u8],
    operation: &'static str,
    round: usize,
) -> Result<()> {
    next.send_all(data).inspect_err(|e| {
        tracing::warn!(
            rank = comm.rank(),
            peer = next.peer(),
            round,
            operation,
            error = %e,
            "ring send rejected"
        );
    })
}

/// Wait for one round's incoming segment, bounded by the collective
/// timeout.
pub(crate) async fn recv_segment(
    comm: &dyn Communicator,
    prev: &dyn Channel,
    buf: &mut [u8],
    operation: &'static str,
    round: usize,
) -> Result<()> {
    let timeout = comm.config().collective_timeout;
    let res = match tokio::time::timeout(timeout, prev.recv_all(buf)).await {
        Ok(r) => r,
        Err(_) => Err(RingError::Timeout {
            rank: prev.peer(),
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    if let Err(e) = &res {
        tracing::warn!(
            rank = comm.rank(),
            peer = prev.peer(),
            round,
            operation,
            error = %e,
            "ring round aborted"
        );
    }
    res
}
