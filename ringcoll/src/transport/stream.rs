use crate::error::{RingError, Result};
use crate::transport::Channel;
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, watch};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

enum Outgoing {
    Data(Vec<u8>),
    Shutdown,
}

/// Writer-side state published by the background write task.
#[derive(Debug, Clone, Default)]
struct SendProgress {
    /// Number of submitted payloads fully written.
    completed: u64,
    /// First write error; the writer stops after it.
    failure: Option<(std::io::ErrorKind, String)>,
    closed: bool,
}

/// A [`Channel`] over any async byte stream (a TCP socket, an in-process
/// duplex pipe).
///
/// Raw bytes go on the wire with no framing: both ends agree on segment
/// lengths before the ring starts. Sends are queued to a background
/// writer task so `send_all` never waits; `block` waits for the writer to
/// catch up with everything submitted so far.
///
/// A receive that fails or is dropped before filling its buffer leaves
/// the byte stream at an unknown position. The channel is then marked
/// desynchronized: its write side is shut down so the peer sees EOF, and
/// every later operation fails with [`RingError::Desynchronized`].
pub struct StreamChannel {
    peer: Rank,
    outbox: mpsc::UnboundedSender<Outgoing>,
    submitted: AtomicU64,
    closing: AtomicBool,
    desynced: AtomicBool,
    progress: watch::Receiver<SendProgress>,
    reader: Mutex<BoxedReader>,
    /// Background writer task handle.
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl StreamChannel {
    /// Wrap the two halves of a connected stream. Must be called inside a
    /// tokio runtime.
    pub fn new<R, W>(peer: Rank, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbox, rx) = mpsc::unbounded_channel();
        let (progress_tx, progress) = watch::channel(SendProgress::default());
        let writer_handle = tokio::spawn(write_loop(peer, writer, rx, progress_tx));

        Self {
            peer,
            outbox,
            submitted: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            desynced: AtomicBool::new(false),
            progress,
            reader: Mutex::new(Box::new(reader)),
            _writer_handle: writer_handle,
        }
    }

    /// Close the write side once queued sends are flushed. The peer sees
    /// EOF; later sends on this channel fail with [`RingError::Closed`].
    pub fn shutdown(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.outbox.send(Outgoing::Shutdown);
        }
    }

    /// True once a receive on this channel ended without filling its
    /// buffer.
    pub fn is_desynchronized(&self) -> bool {
        self.desynced.load(Ordering::Acquire)
    }

    fn mark_desynchronized(&self) {
        if !self.desynced.swap(true, Ordering::AcqRel) {
            tracing::warn!(peer = self.peer, "incomplete receive, abandoning channel");
            self.shutdown();
        }
    }

    fn check_synced(&self) -> Result<()> {
        if self.is_desynchronized() {
            return Err(RingError::Desynchronized { rank: self.peer });
        }
        Ok(())
    }

    fn check_writer(&self) -> Result<()> {
        self.check_synced()?;
        let p = self.progress.borrow();
        if let Some((kind, msg)) = &p.failure {
            return Err(write_error(self.peer, *kind, msg));
        }
        if p.closed || self.closing.load(Ordering::Acquire) {
            return Err(RingError::Closed);
        }
        Ok(())
    }
}

impl Channel for StreamChannel {
    fn peer(&self) -> Rank {
        self.peer
    }

    fn send_all(&self, data: &[u8]) -> Result<()> {
        self.check_writer()?;
        self.outbox
            .send(Outgoing::Data(data.to_vec()))
            .map_err(|_| RingError::Closed)?;
        self.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn recv_all<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_synced()?;
            if buf.is_empty() {
                return Ok(());
            }
            let guard = RecvGuard {
                channel: self,
                done: false,
            };
            let mut reader = self.reader.lock().await;
            self.check_synced()?;
            let mut filled = 0;
            while filled < buf.len() {
                match reader.read(&mut buf[filled..]).await {
                    Ok(0) if filled == 0 => {
                        return Err(RingError::PeerDisconnected { rank: self.peer });
                    }
                    Ok(0) => {
                        return Err(RingError::ShortTransfer {
                            rank: self.peer,
                            expected: buf.len(),
                            actual: filled,
                        });
                    }
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(io_error(self.peer, e)),
                }
            }
            guard.disarm();
            Ok(())
        })
    }

    fn block(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_synced()?;
            let target = self.submitted.load(Ordering::Acquire);
            let mut rx = self.progress.clone();
            // A dropped sender means the writer exited; the last published
            // value still tells us why.
            let _ = rx
                .wait_for(|p| p.completed >= target || p.failure.is_some() || p.closed)
                .await;

            let p = self.progress.borrow();
            if p.completed >= target {
                return Ok(());
            }
            match &p.failure {
                Some((kind, msg)) => Err(write_error(self.peer, *kind, msg)),
                None => Err(RingError::Closed),
            }
        })
    }
}

/// Marks the channel desynchronized unless the receive it covers
/// completes. Dropping the receive future counts as not completing.
struct RecvGuard<'a> {
    channel: &'a StreamChannel,
    done: bool,
}

impl RecvGuard<'_> {
    fn disarm(mut self) {
        self.done = true;
    }
}

impl Drop for RecvGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.channel.mark_desynchronized();
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    peer: Rank,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    progress: watch::Sender<SendProgress>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outgoing::Data(data) => {
                let res = async {
                    writer.write_all(&data).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = res {
                    tracing::warn!(peer, bytes = data.len(), error = %e, "channel write failed");
                    progress.send_modify(|p| p.failure = Some((e.kind(), e.to_string())));
                    return;
                }
                progress.send_modify(|p| p.completed += 1);
            }
            Outgoing::Shutdown => break,
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(peer, error = %e, "channel shutdown failed");
    }
    progress.send_modify(|p| p.closed = true);
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

fn write_error(peer: Rank, kind: std::io::ErrorKind, msg: &str) -> RingError {
    if is_disconnect(kind) {
        RingError::PeerDisconnected { rank: peer }
    } else {
        RingError::transport(format!("write to rank {peer}: {msg}"))
    }
}

fn io_error(peer: Rank, e: std::io::Error) -> RingError {
    if is_disconnect(e.kind()) {
        RingError::PeerDisconnected { rank: peer }
    } else {
        RingError::transport_with_source(format!("read from rank {peer}"), e)
    }
}
