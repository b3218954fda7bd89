use crate::types::Rank;

pub type Result<T> = std::result::Result<T, RingError>;

/// Coarse classification of a [`RingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller broke a contract (bad rank, offset, world or buffer size).
    /// These indicate a programming bug, not a condition to retry.
    InvariantViolation,
    /// A send or receive did not complete: peer unreachable, connection
    /// reset, timeout or short read.
    TransferFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("invalid world size {world}: must be at least 1")]
    InvalidWorld { world: u32 },

    #[error("invalid rank {rank}: world size is {world}")]
    InvalidRank { rank: Rank, world: u32 },

    #[error("invalid ring offset {offset}: world size is {world}")]
    InvalidRingOffset { offset: u32, world: u32 },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("declared {actual} segment sizes for a world of {expected}")]
    SizeCountMismatch { expected: usize, actual: usize },

    #[error("connection to rank {rank} failed: {reason}")]
    ConnectionFailed { rank: Rank, reason: String },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("short transfer from rank {rank}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        rank: Rank,
        expected: usize,
        actual: usize,
    },

    #[error("channel to rank {rank} is out of sync after an incomplete receive")]
    Desynchronized { rank: Rank },

    #[error("{operation} with rank {rank} timed out after {timeout_ms}ms")]
    Timeout {
        rank: Rank,
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("communicator closed")]
    Closed,
}

impl RingError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RingError::InvalidWorld { .. }
            | RingError::InvalidRank { .. }
            | RingError::InvalidRingOffset { .. }
            | RingError::BufferSizeMismatch { .. }
            | RingError::SizeCountMismatch { .. } => ErrorKind::InvariantViolation,
            RingError::ConnectionFailed { .. }
            | RingError::PeerDisconnected { .. }
            | RingError::ShortTransfer { .. }
            | RingError::Desynchronized { .. }
            | RingError::Timeout { .. }
            | RingError::Transport { .. }
            | RingError::Io(_)
            | RingError::Closed => ErrorKind::TransferFailure,
        }
    }

    /// True for contract violations by the caller.
    pub fn is_invariant_violation(&self) -> bool {
        self.kind() == ErrorKind::InvariantViolation
    }
}
