//! Failure short-circuit: instrumented channels that fail at a chosen
//! round, driven by a single worker's view of the ring.

use futures::future::BoxFuture;
use ringcoll::{
    Channel, Communicator, ErrorKind, Lane, Rank, RingConfig, RingError, ring_allgather,
    ring_allgather_v, ring_allreduce,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Communicator stub. Hands out the registered channels by peer rank and
/// records every group-wide `block`.
struct StubComm {
    rank: Rank,
    world: u32,
    config: RingConfig,
    channels: Vec<Arc<CountingChannel>>,
    block_calls: AtomicUsize,
    /// Receives completed on all channels when each `block` started.
    recvs_at_block: Mutex<Vec<usize>>,
    block_error: Mutex<Option<RingError>>,
}

impl StubComm {
    fn with_channels(mut self, channels: Vec<Arc<CountingChannel>>) -> Self {
        self.channels = channels;
        self
    }

    fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }
}

impl Communicator for StubComm {
    fn world(&self) -> u32 {
        self.world
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn config(&self) -> &RingConfig {
        &self.config
    }

    fn channel_on(
        &self,
        peer: Rank,
        _lane: Lane,
    ) -> BoxFuture<'_, ringcoll::Result<Arc<dyn Channel>>> {
        Box::pin(async move {
            match self.channels.iter().find(|c| c.peer == peer) {
                Some(ch) => Ok(Arc::clone(ch) as Arc<dyn Channel>),
                None => Err(RingError::ConnectionFailed {
                    rank: peer,
                    reason: "stub".into(),
                }),
            }
        })
    }

    fn block(&self) -> BoxFuture<'_, ringcoll::Result<()>> {
        Box::pin(async move {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            let recvs = self.channels.iter().map(|c| c.recvs()).sum::<usize>();
            self.recvs_at_block.lock().unwrap().push(recvs);
            match self.block_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

/// Counts submitted operations. Receives fill the buffer with `fill` and
/// the receive numbered `fail_at` (0-based) fails.
struct CountingChannel {
    peer: Rank,
    fill: u8,
    fail_at: Option<usize>,
    sends: AtomicUsize,
    recvs: AtomicUsize,
    send_lens: Mutex<Vec<usize>>,
}

impl CountingChannel {
    fn new(peer: Rank, fail_at: Option<usize>) -> Self {
        Self {
            peer,
            fill: 0,
            fail_at,
            sends: AtomicUsize::new(0),
            recvs: AtomicUsize::new(0),
            send_lens: Mutex::new(Vec::new()),
        }
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn recvs(&self) -> usize {
        self.recvs.load(Ordering::SeqCst)
    }
}

impl Channel for CountingChannel {
    fn peer(&self) -> Rank {
        self.peer
    }

    fn send_all(&self, data: &[u8]) -> ringcoll::Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.send_lens.lock().unwrap().push(data.len());
        Ok(())
    }

    fn recv_all<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, ringcoll::Result<()>> {
        Box::pin(async move {
            let n = self.recvs.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_at {
                return Err(RingError::ShortTransfer {
                    rank: self.peer,
                    expected: buf.len(),
                    actual: 0,
                });
            }
            buf.fill(self.fill);
            Ok(())
        })
    }

    fn block(&self) -> BoxFuture<'_, ringcoll::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn stub(rank: Rank, world: u32) -> StubComm {
    StubComm {
        rank,
        world,
        config: RingConfig::default(),
        channels: Vec::new(),
        block_calls: AtomicUsize::new(0),
        recvs_at_block: Mutex::new(Vec::new()),
        block_error: Mutex::new(None),
    }
}

#[tokio::test]
async fn test_allgather_stops_at_failed_round() {
    let world = 6;
    for fail_round in 0..world as usize {
        let comm = stub(2, world);
        let prev = CountingChannel::new(1, Some(fail_round));
        let next = CountingChannel::new(3, None);
        let mut data = vec![0u8; 6 * 4];

        let err = ring_allgather(&comm, &mut data, 4, 0, &prev, &next)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RingError::ShortTransfer {
                rank: 1,
                expected: 4,
                actual: 0
            }
        ));
        assert_eq!(err.kind(), ErrorKind::TransferFailure);
        // Round k submitted its send and receive; nothing after it ran.
        assert_eq!(next.sends(), fail_round + 1, "fail at {fail_round}");
        assert_eq!(prev.recvs(), fail_round + 1, "fail at {fail_round}");
    }
}

#[tokio::test]
async fn test_allgather_runs_world_rounds() {
    let comm = stub(0, 5);
    let prev = CountingChannel::new(4, None);
    let next = CountingChannel::new(1, None);
    let mut data = vec![0u8; 5 * 3];

    ring_allgather(&comm, &mut data, 3, 0, &prev, &next)
        .await
        .unwrap();

    assert_eq!(next.sends(), 5);
    assert_eq!(prev.recvs(), 5);
}

#[tokio::test]
async fn test_zero_length_rounds_still_submitted() {
    let comm = stub(1, 4);
    let prev = CountingChannel::new(0, None);
    let next = CountingChannel::new(2, None);
    let mut data = vec![0u8; 8];

    ring_allgather(&comm, &mut data, 0, 0, &prev, &next)
        .await
        .unwrap();

    assert_eq!(prev.recvs(), 4);
    assert_eq!(*next.send_lens.lock().unwrap(), vec![0; 4]);
}

#[tokio::test]
async fn test_allreduce_stops_in_scatter_phase() {
    let comm = stub(0, 4);
    let prev = CountingChannel::new(3, Some(1));
    let next = CountingChannel::new(1, None);
    let mut data = vec![1.0f64; 8];

    let err = ring_allreduce(&comm, &mut data, &prev, &next, |inc: &[f64], acc: &mut [f64]| {
        for (a, b) in acc.iter_mut().zip(inc) {
            *a += b;
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, RingError::ShortTransfer { rank: 3, .. }));
    assert_eq!(next.sends(), 2);
    assert_eq!(prev.recvs(), 2);
}

#[tokio::test]
async fn test_allreduce_stops_in_gather_phase() {
    // 3 scatter rounds, then the second gather receive fails.
    let comm = stub(2, 4);
    let prev = CountingChannel::new(1, Some(4));
    let next = CountingChannel::new(3, None);
    let mut data = vec![0i32; 12];

    let err = ring_allreduce(&comm, &mut data, &prev, &next, |inc: &[i32], acc: &mut [i32]| {
        for (a, b) in acc.iter_mut().zip(inc) {
            *a += b;
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, RingError::ShortTransfer { rank: 1, .. }));
    assert_eq!(next.sends(), 5);
    assert_eq!(prev.recvs(), 5);
}

#[tokio::test]
async fn test_allreduce_folds_each_round() {
    // Every incoming segment is all 2s; the operator runs once per
    // scatter round on the received segment only.
    let comm = stub(0, 3);
    let mut prev = CountingChannel::new(2, None);
    prev.fill = 2;
    let next = CountingChannel::new(1, None);
    let mut data = vec![1u8; 6];
    let mut calls = Vec::new();

    ring_allreduce(&comm, &mut data, &prev, &next, |inc: &[u8], acc: &mut [u8]| {
        calls.push(inc.len());
        for (a, b) in acc.iter_mut().zip(inc) {
            *a += b;
        }
    })
    .await
    .unwrap();

    assert_eq!(calls, vec![2, 2]);
    // The gather phase overwrites every segment with what prev delivered.
    assert_eq!(data, vec![2u8; 6]);
    // Two scatter rounds plus three gather rounds.
    assert_eq!(prev.recvs(), 5);
    assert_eq!(next.sends(), 5);
}

#[tokio::test]
async fn test_timeout_is_transfer_failure() {
    struct Silent;
    impl Channel for Silent {
        fn peer(&self) -> Rank {
            7
        }
        fn send_all(&self, _data: &[u8]) -> ringcoll::Result<()> {
            Ok(())
        }
        fn recv_all<'a>(&'a self, _buf: &'a mut [u8]) -> BoxFuture<'a, ringcoll::Result<()>> {
            Box::pin(futures::future::pending())
        }
        fn block(&self) -> BoxFuture<'_, ringcoll::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    let mut comm = stub(0, 8);
    comm.config.collective_timeout = std::time::Duration::from_millis(50);
    let mut data = vec![0u8; 8];
    let err = ring_allgather(&comm, &mut data, 1, 0, &Silent, &Silent)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RingError::Timeout {
            rank: 7,
            operation: "allgather",
            timeout_ms: 50
        }
    ));
    assert_eq!(err.kind(), ErrorKind::TransferFailure);
}

// ── AllgatherV ──────────────────────────────────────────────────────

/// Rank 1 of 4: prev is rank 0, next is rank 2.
fn allgather_v_stub(
    fail_at: Option<usize>,
) -> (StubComm, Arc<CountingChannel>, Arc<CountingChannel>) {
    let prev = Arc::new(CountingChannel::new(0, fail_at));
    let next = Arc::new(CountingChannel::new(2, None));
    let comm = stub(1, 4).with_channels(vec![Arc::clone(&prev), Arc::clone(&next)]);
    (comm, prev, next)
}

#[tokio::test]
async fn test_allgather_v_blocks_once_after_all_rounds() {
    let (comm, prev, next) = allgather_v_stub(None);
    let sizes = [2usize, 3, 0, 1];
    let mut out = vec![0u8; 6];

    ring_allgather_v(&comm, &sizes, &[7, 7, 7], &mut out)
        .await
        .unwrap();

    assert_eq!(prev.recvs(), 4);
    assert_eq!(next.sends(), 4);
    assert_eq!(comm.block_calls(), 1);
    assert_eq!(*comm.recvs_at_block.lock().unwrap(), vec![4]);
    // Send sizes follow the offset table: segments 1, 0, 3, 2.
    assert_eq!(*next.send_lens.lock().unwrap(), vec![3, 2, 1, 0]);
}

#[tokio::test]
async fn test_allgather_v_returns_block_error() {
    let (comm, _prev, _next) = allgather_v_stub(None);
    *comm.block_error.lock().unwrap() = Some(RingError::PeerDisconnected { rank: 3 });
    let sizes = [1usize; 4];
    let mut out = vec![0u8; 4];

    let err = ring_allgather_v(&comm, &sizes, &[1], &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, RingError::PeerDisconnected { rank: 3 }));
    assert_eq!(comm.block_calls(), 1);
}

#[tokio::test]
async fn test_allgather_v_failed_round_skips_block() {
    for fail_round in 0..4 {
        let (comm, prev, next) = allgather_v_stub(Some(fail_round));
        let sizes = [2usize; 4];
        let mut out = vec![0u8; 8];

        let err = ring_allgather_v(&comm, &sizes, &[4, 4], &mut out)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RingError::ShortTransfer {
                rank: 0,
                expected: 2,
                actual: 0
            }
        ));
        assert_eq!(next.sends(), fail_round + 1, "fail at {fail_round}");
        assert_eq!(prev.recvs(), fail_round + 1, "fail at {fail_round}");
        assert_eq!(comm.block_calls(), 0, "fail at {fail_round}");
    }
}
