//! Ring-topology collective communication.
//!
//! Workers arranged in a logical ring run allgather (fixed and variable
//! segment sizes) and allreduce by passing one segment per round to their
//! successor. Transfers go through the [`Channel`] and [`Communicator`]
//! traits; [`LocalComm`] and [`TcpComm`] are the bundled implementations.

pub mod collective;
pub mod config;
pub mod error;
pub mod layout;
pub mod reduce;
pub mod topology;
pub mod transport;
pub mod types;

pub use collective::{
    allgather, allgather_typed, allgather_v, allreduce, allreduce_op, ring_allgather,
    ring_allgather_v, ring_allreduce, ring_neighbors,
};
pub use config::RingConfig;
pub use error::{ErrorKind, Result, RingError};
pub use layout::{OffsetTable, Segment};
pub use reduce::Reducible;
pub use topology::Rotation;
pub use transport::{Channel, Comm, Communicator, LocalComm, StreamChannel, TcpComm};
pub use types::{Lane, Rank, ReduceOp};
