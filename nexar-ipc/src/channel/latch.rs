use crate::error::{IpcError, ProtocolViolation, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Cross-process one-shot latch backed by a marker file.
///
/// `set` creates the marker with `O_CREAT | O_EXCL`, so exactly one caller in
/// any process wins and every later caller gets `AlreadySignaled`. The marker
/// holds the id of the exchange it signals, so a reader can tell a fresh
/// signal from one left behind by an earlier exchange.
///
/// Once the setter, or a reader that has judged the signal current, records
/// the id with [`confirm`](Self::confirm), the latch never goes back to unset
/// for that instance.
#[derive(Debug)]
pub struct ReadinessLatch {
    path: PathBuf,
    observed: OnceLock<u64>,
}

impl ReadinessLatch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observed: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transition `unset -> set` for `exchange`.
    pub fn set(&self, exchange: u64) -> Result<()> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(&exchange.to_le_bytes())?;
                file.sync_all()?;
                self.confirm(exchange);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(IpcError::Protocol(ProtocolViolation::AlreadySignaled))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exchange id the marker signals, or `None` while unset.
    ///
    /// A marker whose id is not yet fully written reads as unset.
    pub fn exchange(&self) -> Result<Option<u64>> {
        if let Some(id) = self.observed.get() {
            return Ok(Some(*id));
        }
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(bytes
                .get(..8)
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .map(u64::from_le_bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_set(&self) -> Result<bool> {
        Ok(self.exchange()?.is_some())
    }

    /// Whether this instance has pinned the signal as current.
    pub fn is_confirmed(&self) -> bool {
        self.observed.get().is_some()
    }

    /// Pin `exchange` as the current signal. Later reads return it without
    /// touching the marker.
    pub fn confirm(&self, exchange: u64) {
        let _ = self.observed.set(exchange);
    }

    /// Remove the marker so the directory can host a fresh exchange.
    pub(crate) fn reset(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.observed.take();
        Ok(())
    }
}
