//! Runtime-configurable parameters for handle exchange.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `NEXAR_IPC_`) or by constructing a custom `IpcConfig`.

use crate::types::DeviceIndex;
use std::time::Duration;

/// Tuning parameters for the exchange channel, participants and session.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// How long the consumer waits for the readiness latch.
    pub ready_timeout: Duration,

    /// Upper bound on a whole session, from spawn to both terminals.
    pub session_timeout: Duration,

    /// Interval at which file-backed channels re-check shared state.
    pub poll_interval: Duration,

    /// Number of `u32` elements in the test pattern. Must be non-zero.
    pub pattern_len: usize,

    /// Value every pattern element is filled with. Must be non-zero, or
    /// untouched zeroed memory would verify.
    pub pattern_value: u32,

    /// GPU ordinal the producer allocates on.
    pub device: DeviceIndex,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            pattern_len: 1024,
            pattern_value: 1,
            device: 0,
        }
    }
}

impl IpcConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `NEXAR_IPC_READY_TIMEOUT_MS`
    /// - `NEXAR_IPC_SESSION_TIMEOUT_MS`
    /// - `NEXAR_IPC_POLL_INTERVAL_MS`
    /// - `NEXAR_IPC_PATTERN_LEN`
    /// - `NEXAR_IPC_PATTERN_VALUE`
    /// - `NEXAR_IPC_DEVICE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = lookup("NEXAR_IPC_READY_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) =
            lookup("NEXAR_IPC_SESSION_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok())
        {
            cfg.session_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = lookup("NEXAR_IPC_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok())
        {
            cfg.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = lookup("NEXAR_IPC_PATTERN_LEN").and_then(|v| v.parse::<usize>().ok())
            && n > 0
        {
            cfg.pattern_len = n;
        }
        if let Some(v) = lookup("NEXAR_IPC_PATTERN_VALUE").and_then(|v| v.parse::<u32>().ok())
            && v > 0
        {
            cfg.pattern_value = v;
        }
        if let Some(d) = lookup("NEXAR_IPC_DEVICE").and_then(|v| v.parse::<u32>().ok()) {
            cfg.device = d;
        }

        cfg
    }
}
