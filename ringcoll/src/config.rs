//! Runtime-configurable tuning parameters for ringcoll.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `RINGCOLL_`) or by constructing a custom `RingConfig`.

use std::time::Duration;

/// Tuning parameters for ring collectives and the bundled transports.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Upper bound on each blocking receive inside a ring round, and on
    /// the settle wait of `Communicator::block`.
    pub collective_timeout: Duration,

    /// Total time allowed to establish one channel.
    pub connect_timeout: Duration,

    /// Delay between TCP dial attempts while a peer is not yet listening.
    pub connect_retry_interval: Duration,

    /// Capacity of each direction of an in-process duplex channel.
    pub local_buffer_bytes: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            connect_retry_interval: Duration::from_millis(50),
            local_buffer_bytes: 256 * 1024, // 256 KiB
        }
    }
}

impl RingConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `RINGCOLL_COLLECTIVE_TIMEOUT_MS`
    /// - `RINGCOLL_CONNECT_TIMEOUT_MS`
    /// - `RINGCOLL_CONNECT_RETRY_MS`
    /// - `RINGCOLL_LOCAL_BUFFER_BYTES`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(d) = millis("RINGCOLL_COLLECTIVE_TIMEOUT_MS") {
            cfg.collective_timeout = d;
        }
        if let Some(d) = millis("RINGCOLL_CONNECT_TIMEOUT_MS") {
            cfg.connect_timeout = d;
        }
        if let Some(d) = millis("RINGCOLL_CONNECT_RETRY_MS") {
            cfg.connect_retry_interval = d;
        }
        if let Some(n) =
            lookup("RINGCOLL_LOCAL_BUFFER_BYTES").and_then(|v| v.parse::<usize>().ok())
        {
            cfg.local_buffer_bytes = n.max(1);
        }

        cfg
    }
}
