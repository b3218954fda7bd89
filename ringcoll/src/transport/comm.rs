use crate::config::RingConfig;
use crate::error::{RingError, Result};
use crate::topology::check_rank;
use crate::transport::{Channel, ChannelRegistry, Communicator, Connector};
use crate::types::{Lane, Rank};
use futures::future::BoxFuture;
use std::sync::Arc;

/// A [`Communicator`] whose channels come from a [`ChannelRegistry`].
///
/// Long-lived: create it once per worker and reuse it across collective
/// calls. See [`crate::transport::LocalComm`] and
/// [`crate::transport::TcpComm`] for ready-made constructors.
pub struct Comm<C: Connector> {
    rank: Rank,
    world: u32,
    config: RingConfig,
    registry: ChannelRegistry<C>,
}

impl<C: Connector> Comm<C> {
    pub fn new(rank: Rank, world: u32, config: RingConfig, connector: C) -> Result<Self> {
        check_rank(rank, world)?;
        Ok(Self {
            rank,
            world,
            config,
            registry: ChannelRegistry::new(rank, world, connector),
        })
    }

    /// Shut down all channels of this worker. Peers blocked on a receive
    /// from it observe a disconnect; later calls here fail with
    /// [`RingError::Closed`].
    pub fn close(&self) {
        tracing::debug!(rank = self.rank, "closing communicator");
        self.registry.close();
    }

    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }
}

impl<C: Connector> Communicator for Comm<C> {
    fn world(&self) -> u32 {
        self.world
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn config(&self) -> &RingConfig {
        &self.config
    }

    fn channel_on(&self, peer: Rank, lane: Lane) -> BoxFuture<'_, Result<Arc<dyn Channel>>> {
        Box::pin(async move {
            let ch = self.registry.get(peer, lane).await?;
            Ok(ch as Arc<dyn Channel>)
        })
    }

    fn block(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(RingError::Closed);
            }
            let timeout = self.config.collective_timeout;
            for ch in self.registry.established() {
                match tokio::time::timeout(timeout, ch.block()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(RingError::Timeout {
                            rank: ch.peer(),
                            operation: "block",
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
            Ok(())
        })
    }
}
