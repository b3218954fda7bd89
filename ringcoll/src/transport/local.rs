use crate::config::RingConfig;
use crate::error::{RingError, Result};
use crate::topology::check_world;
use crate::transport::{Comm, Connector, StreamChannel};
use crate::types::{Lane, Rank};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;

/// In-process workers connected through `tokio::io::duplex` pipes.
pub type LocalComm = Comm<LocalConnector>;

/// Shared between all workers of one local group.
#[derive(Default)]
struct Switchboard {
    /// Far ends of pipes opened by one side, waiting for the other side.
    /// Keyed by `(lower rank, higher rank, lane)`.
    parked: HashMap<(Rank, Rank, Lane), DuplexStream>,
    /// Ranks that have closed their communicator.
    dead: HashSet<Rank>,
}

pub struct LocalConnector {
    board: Arc<Mutex<Switchboard>>,
    buffer_bytes: usize,
}

impl LocalConnector {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Switchboard>> {
        self.board
            .lock()
            .map_err(|_| RingError::transport("local switchboard lock poisoned"))
    }
}

impl Connector for LocalConnector {
    fn connect(&self, local: Rank, peer: Rank, lane: Lane) -> BoxFuture<'_, Result<StreamChannel>> {
        Box::pin(async move {
            let stream = {
                let mut board = self.lock()?;
                if board.dead.contains(&peer) {
                    return Err(RingError::ConnectionFailed {
                        rank: peer,
                        reason: "peer closed".into(),
                    });
                }
                let key = (local.min(peer), local.max(peer), lane);
                match board.parked.remove(&key) {
                    Some(theirs) => theirs,
                    None => {
                        let (mine, theirs) = tokio::io::duplex(self.buffer_bytes);
                        board.parked.insert(key, theirs);
                        mine
                    }
                }
            };
            let (reader, writer) = tokio::io::split(stream);
            Ok(StreamChannel::new(peer, reader, writer))
        })
    }

    fn close(&self, local: Rank) {
        let Ok(mut board) = self.board.lock() else {
            return;
        };
        board.dead.insert(local);
        // Dropping a parked pipe end closes it for the side already holding
        // the other end.
        board.parked.retain(|&(lo, hi, _), _| lo != local && hi != local);
    }
}

impl Comm<LocalConnector> {
    /// Create `world` in-process workers sharing one switchboard.
    ///
    /// Channels are opened lazily on first use, so this can be called
    /// outside a runtime; the collectives themselves need tokio.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ringcoll::{Communicator, LocalComm, RingConfig};
    ///
    /// let comms = LocalComm::bootstrap_local(4, RingConfig::default()).unwrap();
    /// assert_eq!(comms[2].rank(), 2);
    /// assert_eq!(comms[2].world(), 4);
    /// ```
    pub fn bootstrap_local(world: u32, config: RingConfig) -> Result<Vec<Self>> {
        check_world(world)?;
        let board = Arc::new(Mutex::new(Switchboard::default()));
        (0..world)
            .map(|rank| {
                let connector = LocalConnector {
                    board: Arc::clone(&board),
                    buffer_bytes: config.local_buffer_bytes,
                };
                Comm::new(rank, world, config.clone(), connector)
            })
            .collect()
    }
}
