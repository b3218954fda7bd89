//! Ring collectives.
//!
//! The `ring_*` functions take already-resolved neighbour channels so
//! several rotations can run side by side on different lanes. The short
//! names ([`allgather`], [`allgather_v`], [`allreduce`]) resolve the
//! default-lane neighbours themselves.

mod allgather;
mod allgather_v;
mod allreduce;
mod helpers;

pub use allgather::{allgather, allgather_typed, ring_allgather};
pub use allgather_v::{allgather_v, ring_allgather_v};
pub use allreduce::{allreduce, allreduce_op, ring_allreduce};
pub use helpers::{RingNeighbors, ring_neighbors};
