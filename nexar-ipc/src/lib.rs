//! Cross-process GPU memory handle exchange.
//!
//! A producer allocates device memory, exports an IPC handle and publishes it
//! through a shared [`ExchangeChannel`]. A consumer in another process (or
//! container) waits for the readiness latch, maps the handle and verifies a
//! test pattern. Whether that mapping can succeed at all is decided up front
//! by the [`oracle`] from the deployment's [`CapabilitySet`].

pub mod capability;
pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod oracle;
pub mod participant;
pub mod protocol;
pub mod session;
pub mod topology;
pub mod types;

pub use capability::CapabilitySet;
pub use channel::{ChannelState, ExchangeChannel, FileChannel, ReadinessLatch};
pub use config::IpcConfig;
#[cfg(feature = "cuda")]
pub use device::CudaIpcProvider;
pub use device::{GpuIpcProvider, HostIpcProvider, Mapping, OwnedAllocation};
pub use error::{DeviceErrorKind, IpcError, ProtocolViolation, Result};
pub use event::{EventSink, ExchangeEvent, TracingSink};
pub use oracle::{DenyReason, Verdict};
pub use participant::{
    Consumer, FailureReason, ParticipantState, Producer, Role, Terminal, TestPattern,
};
pub use protocol::ConsumerReport;
pub use session::{ExchangeSession, Outcome, SessionCanceller};
pub use topology::Topology;
pub use types::{DeviceIndex, MemoryHandle};
