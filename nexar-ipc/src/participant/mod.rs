//! Producer and consumer roles of a handle exchange.

mod consumer;
mod producer;
mod state;

pub use consumer::Consumer;
pub use producer::Producer;
pub use state::{FailureReason, ParticipantState, Role, Terminal};
pub(crate) use state::StateMachine;

use crate::error::{DeviceErrorKind, IpcError, Result};
use tokio::sync::watch;

/// Largest slice of the pattern staged in host memory at once. A multiple of
/// the element size so chunk boundaries never split an element.
pub(crate) const CHUNK_BYTES: usize = 1 << 20;

/// Deterministic data the producer writes and the consumer verifies:
/// `len` little-endian `u32` elements, all equal to `value`.
///
/// A usable pattern has `len > 0` and `value > 0`; an all-zero pattern would
/// verify against memory nobody wrote. See [`TestPattern::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestPattern {
    len: usize,
    value: u32,
}

impl TestPattern {
    pub fn new(len: usize, value: u32) -> Self {
        Self { len, value }
    }

    /// `[1, 1, ..., 1]` of length `len`; its checksum is `len`.
    pub fn ones(len: usize) -> Self {
        Self::new(len, 1)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Byte size of the pattern, or `None` if it does not fit in `usize`.
    pub fn size_bytes(&self) -> Option<usize> {
        self.len.checked_mul(std::mem::size_of::<u32>())
    }

    /// Check the pattern can be exchanged and return its byte size.
    pub fn validate(&self) -> Result<usize> {
        if self.value == 0 {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                "pattern value 0 cannot be told apart from zeroed memory",
            ));
        }
        match self.size_bytes() {
            Some(0) => Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                "pattern is empty",
            )),
            Some(n) => Ok(n),
            None => Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!("pattern of {} elements overflows the address space", self.len),
            )),
        }
    }

    /// The first `bytes` bytes of the pattern, rounded down to whole elements.
    pub fn prefix(&self, bytes: usize) -> Vec<u8> {
        let elems = (bytes / std::mem::size_of::<u32>()).min(self.len);
        self.value.to_le_bytes().repeat(elems)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_le_bytes().repeat(self.len)
    }

    pub fn expected_checksum(&self) -> u64 {
        (self.len as u64).wrapping_mul(self.value as u64)
    }

    /// Wrapping sum of the little-endian `u32` elements in `bytes`. A trailing
    /// partial element is ignored.
    pub fn checksum(bytes: &[u8]) -> u64 {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64)
            .fold(0u64, u64::wrapping_add)
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if every sender is
/// gone without cancelling.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
