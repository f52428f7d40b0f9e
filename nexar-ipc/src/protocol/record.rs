use crate::participant::{FailureReason, Terminal};
use crate::types::MemoryHandle;

/// The consumer's terminal state, written once into the channel so the
/// producer can end its keep-alive without any other communication path.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ConsumerReport {
    /// The mapped region summed to the expected checksum.
    Verified { checksum: u64 },
    /// The handshake completed but the data did not match.
    DataMismatch { expected: u64, actual: u64 },
    /// The consumer stopped before verification.
    Failed { reason: FailureReason },
}

impl From<FailureReason> for ConsumerReport {
    fn from(reason: FailureReason) -> Self {
        ConsumerReport::Failed { reason }
    }
}

impl From<ConsumerReport> for Terminal {
    fn from(report: ConsumerReport) -> Self {
        match report {
            ConsumerReport::Verified { checksum } => Terminal::Verified { checksum },
            ConsumerReport::DataMismatch { expected, actual } => {
                Terminal::DataMismatch { expected, actual }
            }
            ConsumerReport::Failed { reason } => Terminal::Failed(reason),
        }
    }
}

/// Records persisted in the exchange channel.
///
/// The payload is small and fixed-shape, so it is rkyv-encoded whole behind
/// a framed header.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum ChannelRecord {
    /// A published handle, tagged with the id of the exchange that
    /// published it. The readiness marker carries the same id.
    Handle { exchange: u64, handle: MemoryHandle },
    Report(ConsumerReport),
}
