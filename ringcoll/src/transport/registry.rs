use crate::error::{RingError, Result};
use crate::transport::StreamChannel;
use crate::types::{Lane, Rank};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Opens the byte stream behind one edge of the ring.
///
/// Called at most once per `(peer, lane)` by [`ChannelRegistry`], and
/// never for `peer == local`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, local: Rank, peer: Rank, lane: Lane) -> BoxFuture<'_, Result<StreamChannel>>;

    /// Release connector-level resources (listeners, parked streams).
    fn close(&self, _local: Rank) {}
}

type Slot = Arc<OnceCell<Arc<StreamChannel>>>;

/// Lazily-populated map of channels keyed by `(peer, lane)`.
///
/// Each edge has its own once-cell: concurrent callers asking for the same
/// edge wait on a single connection attempt, while different edges are
/// established independently. A failed attempt leaves the cell empty so a
/// later call can try again.
pub struct ChannelRegistry<C> {
    rank: Rank,
    world: u32,
    connector: C,
    slots: Mutex<HashMap<(Rank, Lane), Slot>>,
    closed: AtomicBool,
}

impl<C: Connector> ChannelRegistry<C> {
    pub fn new(rank: Rank, world: u32, connector: C) -> Self {
        Self {
            rank,
            world,
            connector,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Channel to `peer` on `lane`, connecting on first use.
    pub async fn get(&self, peer: Rank, lane: Lane) -> Result<Arc<StreamChannel>> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        if peer >= self.world || peer == self.rank {
            return Err(RingError::InvalidRank {
                rank: peer,
                world: self.world,
            });
        }

        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| RingError::transport("channel registry lock poisoned"))?;
            Arc::clone(slots.entry((peer, lane)).or_default())
        };

        let ch = slot
            .get_or_try_init(|| async {
                tracing::debug!(rank = self.rank, peer, lane, "establishing channel");
                let ch = self.connector.connect(self.rank, peer, lane).await;
                if let Err(e) = &ch {
                    tracing::warn!(
                        rank = self.rank,
                        peer,
                        lane,
                        error = %e,
                        "channel setup failed"
                    );
                }
                ch.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(ch))
    }

    /// Snapshot of every channel established so far.
    pub fn established(&self) -> Vec<Arc<StreamChannel>> {
        let Ok(slots) = self.slots.lock() else {
            return Vec::new();
        };
        slots.values().filter_map(|s| s.get().cloned()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut every channel down and refuse new ones.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for ch in self.established() {
            ch.shutdown();
        }
        self.connector.close(self.rank);
    }
}
