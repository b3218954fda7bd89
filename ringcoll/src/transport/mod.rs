//! Point-to-point channels and the communicator that hands them out.
//!
//! The collectives only see the [`Channel`] and [`Communicator`] traits.
//! [`Comm`] is the bundled communicator; it is generic over a
//! [`Connector`] that knows how to open a byte stream to a peer
//! ([`LocalConnector`] for in-process workers, [`TcpConnector`] for TCP).

mod comm;
mod local;
mod registry;
mod stream;
mod tcp;

pub use comm::Comm;
pub use local::{LocalComm, LocalConnector};
pub use registry::{ChannelRegistry, Connector};
pub use stream::StreamChannel;
pub use tcp::{TcpComm, TcpConnector};

use crate::config::RingConfig;
use crate::error::Result;
use crate::types::{Lane, Rank};
use futures::future::BoxFuture;
use std::sync::Arc;

/// A reliable, ordered byte-stream endpoint to exactly one peer.
///
/// Sends are submitted without waiting; receives are awaited. At most one
/// send and one receive are outstanding per round on a given channel.
pub trait Channel: Send + Sync {
    /// Rank on the other end of this channel.
    fn peer(&self) -> Rank;

    /// Submit `data` for sending and return immediately.
    ///
    /// The bytes are copied, so the caller may reuse its buffer right
    /// away. Errors here only report a channel that has already failed;
    /// write failures surface from [`Channel::block`].
    fn send_all(&self, data: &[u8]) -> Result<()>;

    /// Receive exactly `buf.len()` bytes. Zero-length receives complete
    /// immediately.
    fn recv_all<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, Result<()>>;

    /// Wait until every send submitted before this call has been written.
    fn block(&self) -> BoxFuture<'_, Result<()>>;
}

/// Process-wide view of a fixed-size worker group.
pub trait Communicator: Send + Sync {
    fn world(&self) -> u32;

    fn rank(&self) -> Rank;

    fn config(&self) -> &RingConfig;

    /// Resolve, or lazily establish, the channel to `peer` on `lane`.
    fn channel_on(&self, peer: Rank, lane: Lane) -> BoxFuture<'_, Result<Arc<dyn Channel>>>;

    /// Resolve the default-lane channel to `peer`.
    fn channel(&self, peer: Rank) -> BoxFuture<'_, Result<Arc<dyn Channel>>> {
        self.channel_on(peer, 0)
    }

    /// Wait for all outstanding operations on every channel of this
    /// communicator to settle.
    fn block(&self) -> BoxFuture<'_, Result<()>>;
}
