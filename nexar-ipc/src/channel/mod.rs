//! The exchange channel: the only path between producer and consumer.
//!
//! Every field is single-writer. The producer owns the handle slot and the
//! readiness latch; the consumer owns the report slot.

mod file;
mod latch;

pub use file::FileChannel;
pub use latch::ReadinessLatch;

use crate::error::Result;
use crate::protocol::ConsumerReport;
use crate::types::MemoryHandle;
use futures::future::BoxFuture;
use std::time::Duration;

/// Observable progress of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing published.
    Empty,
    /// Handle published, readiness not yet signaled.
    Published,
    /// Handle published and readiness signaled.
    Ready,
    /// Records of an exchange that finished before this instance saw it
    /// signaled. The handle must not be consumed; `clear` before reuse.
    Stale,
}

/// Shared medium visible to both participants across process boundaries.
///
/// Implementations must keep all state in the shared medium itself; two
/// instances opened on the same location in different processes observe the
/// same channel.
pub trait ExchangeChannel: Send + Sync {
    /// Write the handle. Fails with `AlreadyPublished` on a second call.
    fn publish(&self, handle: &MemoryHandle) -> Result<()>;

    /// Set the readiness latch. Fails with `NotPublished` before `publish`
    /// and `AlreadySignaled` on a second call.
    fn signal_ready(&self) -> Result<()>;

    /// Suspend until readiness of a current exchange is observed. Fails
    /// with `ReadyTimeout`, or with `StaleExchange` if all that was seen by
    /// the deadline is a finished exchange.
    fn await_ready<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<()>>;

    /// Read the published handle. Fails with `NotPublished` before `publish`
    /// and with `StaleExchange` when the handle belongs to a finished
    /// exchange.
    fn read_handle(&self) -> Result<MemoryHandle>;

    /// Write the consumer's terminal report. Fails with `AlreadyReported`
    /// on a second call.
    fn report(&self, report: &ConsumerReport) -> Result<()>;

    /// The consumer report, if one has been written.
    fn read_report(&self) -> Result<Option<ConsumerReport>>;

    /// Suspend until a consumer report appears. Unbounded: callers race it
    /// against cancellation.
    fn await_report<'a>(&'a self) -> BoxFuture<'a, Result<ConsumerReport>>;

    fn state(&self) -> Result<ChannelState>;
}
