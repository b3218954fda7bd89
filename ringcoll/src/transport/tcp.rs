use crate::config::RingConfig;
use crate::error::{RingError, Result};
use crate::topology::check_world;
use crate::transport::{Comm, Connector, StreamChannel};
use crate::types::{Lane, Rank};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Workers connected over TCP.
pub type TcpComm = Comm<TcpConnector>;

/// Handshake sent by the dialing side: `[rank: u32 LE][lane: u32 LE]`.
const HANDSHAKE_LEN: usize = 8;

/// Streams accepted from lower ranks, waiting to be claimed.
#[derive(Default)]
struct Inbound {
    pending: Mutex<HashMap<(Rank, Lane), TcpStream>>,
    arrived: Notify,
}

impl Inbound {
    fn take(&self, peer: Rank, lane: Lane) -> Result<Option<TcpStream>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| RingError::transport("inbound lock poisoned"))?;
        Ok(pending.remove(&(peer, lane)))
    }
}

/// Connects ring edges over TCP.
///
/// For each pair of ranks the lower rank dials and the higher rank
/// accepts, so every edge is opened exactly once. Dialing retries until
/// the peer's listener answers or `connect_timeout` elapses.
pub struct TcpConnector {
    peers: Vec<SocketAddr>,
    inbound: Arc<Inbound>,
    connect_timeout: Duration,
    retry_interval: Duration,
    acceptor: tokio::task::JoinHandle<()>,
}

impl TcpConnector {
    /// Start accepting on `listener`. `peers[r]` is the listen address of
    /// rank `r`, as agreed during rendezvous.
    pub fn new(listener: TcpListener, peers: Vec<SocketAddr>, config: &RingConfig) -> Self {
        let inbound = Arc::new(Inbound::default());
        let world = peers.len() as u32;
        let acceptor = tokio::spawn(accept_loop(listener, world, Arc::clone(&inbound)));
        Self {
            peers,
            inbound,
            connect_timeout: config.connect_timeout,
            retry_interval: config.connect_retry_interval,
            acceptor,
        }
    }

    async fn dial(&self, local: Rank, peer: Rank, lane: Lane) -> Result<TcpStream> {
        let addr = self.peers[peer as usize];
        let mut last_err: Option<String> = None;
        let attempt = tokio::time::timeout(self.connect_timeout, async {
            loop {
                match TcpStream::connect(addr).await {
                    Ok(s) => return s,
                    Err(e) => {
                        tracing::debug!(peer, %addr, error = %e, "dial failed, retrying");
                        last_err = Some(e.to_string());
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
            }
        })
        .await;

        let mut stream = attempt.map_err(|_| RingError::ConnectionFailed {
            rank: peer,
            reason: format!(
                "{addr} unreachable after {}ms: {}",
                self.connect_timeout.as_millis(),
                last_err.as_deref().unwrap_or("timed out")
            ),
        })?;
        stream.set_nodelay(true)?;

        let mut hs = [0u8; HANDSHAKE_LEN];
        hs[..4].copy_from_slice(&local.to_le_bytes());
        hs[4..].copy_from_slice(&lane.to_le_bytes());
        stream
            .write_all(&hs)
            .await
            .map_err(|e| RingError::ConnectionFailed {
                rank: peer,
                reason: format!("handshake: {e}"),
            })?;
        Ok(stream)
    }

    async fn claim_inbound(&self, peer: Rank, lane: Lane) -> Result<TcpStream> {
        loop {
            let notified = self.inbound.arrived.notified();
            tokio::pin!(notified);
            // Register before checking so an arrival between the check
            // and the await is not missed.
            notified.as_mut().enable();
            if let Some(s) = self.inbound.take(peer, lane)? {
                return Ok(s);
            }
            notified.await;
        }
    }

    async fn wait_inbound(&self, peer: Rank, lane: Lane) -> Result<TcpStream> {
        tokio::time::timeout(self.connect_timeout, self.claim_inbound(peer, lane))
            .await
            .map_err(|_| RingError::ConnectionFailed {
                rank: peer,
                reason: format!(
                    "no inbound connection on lane {lane} within {}ms",
                    self.connect_timeout.as_millis()
                ),
            })?
    }
}

impl Connector for TcpConnector {
    fn connect(&self, local: Rank, peer: Rank, lane: Lane) -> BoxFuture<'_, Result<StreamChannel>> {
        Box::pin(async move {
            let stream = if local < peer {
                self.dial(local, peer, lane).await?
            } else {
                self.wait_inbound(peer, lane).await?
            };
            let (reader, writer) = stream.into_split();
            Ok(StreamChannel::new(peer, reader, writer))
        })
    }

    fn close(&self, _local: Rank) {
        self.acceptor.abort();
        if let Ok(mut pending) = self.inbound.pending.lock() {
            pending.clear();
        }
    }
}

impl Drop for TcpConnector {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, world: u32, inbound: Arc<Inbound>) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let inbound = Arc::clone(&inbound);
        // Read the handshake off the accept loop so a slow dialer cannot
        // hold up the others.
        tokio::spawn(async move {
            let mut hs = [0u8; HANDSHAKE_LEN];
            if let Err(e) = stream.read_exact(&mut hs).await {
                tracing::warn!(%addr, error = %e, "handshake read failed");
                return;
            }
            let peer = u32::from_le_bytes([hs[0], hs[1], hs[2], hs[3]]);
            let lane = u32::from_le_bytes([hs[4], hs[5], hs[6], hs[7]]);
            if peer >= world {
                tracing::warn!(%addr, peer, world, "handshake from unknown rank");
                return;
            }
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%addr, error = %e, "set_nodelay failed");
            }
            match inbound.pending.lock() {
                Ok(mut pending) => {
                    pending.insert((peer, lane), stream);
                }
                Err(_) => return,
            }
            inbound.arrived.notify_waiters();
        });
    }
}

impl Comm<TcpConnector> {
    /// Build a worker from a bound listener and the rendezvous address
    /// table. The world size is `peers.len()`. Must be called inside a
    /// tokio runtime.
    pub fn from_listener(
        rank: Rank,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
        config: RingConfig,
    ) -> Result<Self> {
        let world = peers.len() as u32;
        let connector = TcpConnector::new(listener, peers, &config);
        Comm::new(rank, world, config, connector)
    }

    /// Bind `world` loopback listeners and build one worker per rank.
    pub async fn bootstrap_local(world: u32, config: RingConfig) -> Result<Vec<Self>> {
        check_world(world)?;
        let mut listeners = Vec::with_capacity(world as usize);
        for _ in 0..world {
            listeners.push(TcpListener::bind(("127.0.0.1", 0)).await?);
        }
        let addrs = listeners
            .iter()
            .map(|l| l.local_addr())
            .collect::<std::io::Result<Vec<_>>>()?;

        listeners
            .into_iter()
            .enumerate()
            .map(|(rank, l)| Self::from_listener(rank as Rank, l, addrs.clone(), config.clone()))
            .collect()
    }
}
