use crate::oracle::DenyReason;
use crate::participant::{FailureReason, ParticipantState};

pub type Result<T> = std::result::Result<T, IpcError>;

/// Ordering or single-writer violations on the exchange channel.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum ProtocolViolation {
    /// `publish` was called on a channel that already holds a handle.
    AlreadyPublished,
    /// `signal_ready` was called on a latch that is already set.
    AlreadySignaled,
    /// The handle was read (or readiness signaled) before `publish`.
    NotPublished,
    /// The consumer report slot was written twice.
    AlreadyReported,
    /// The channel holds records from an exchange that has already finished,
    /// or the handle and readiness marker belong to different exchanges.
    StaleExchange,
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolViolation::AlreadyPublished => f.write_str("handle already published"),
            ProtocolViolation::AlreadySignaled => f.write_str("readiness already signaled"),
            ProtocolViolation::NotPublished => f.write_str("handle not published"),
            ProtocolViolation::AlreadyReported => f.write_str("consumer report already written"),
            ProtocolViolation::StaleExchange => {
                f.write_str("channel holds records of a finished exchange")
            }
        }
    }
}

/// Error classes surfaced by a GPU capability provider.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum DeviceErrorKind {
    /// The handle's owning context cannot be resolved from this process.
    InvalidContext,
    /// The handle or allocation request is malformed.
    InvalidArgument,
    /// The device could not satisfy the allocation.
    OutOfMemory,
    /// Any other driver failure.
    Driver,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorKind::InvalidContext => f.write_str("invalid context"),
            DeviceErrorKind::InvalidArgument => f.write_str("invalid argument"),
            DeviceErrorKind::OutOfMemory => f.write_str("out of memory"),
            DeviceErrorKind::Driver => f.write_str("driver error"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("authorization denied: {reason}")]
    AuthorizationDenied { reason: DenyReason },

    #[error("channel protocol error: {0}")]
    Protocol(ProtocolViolation),

    #[error("readiness not signaled within {timeout_ms}ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("device error ({kind}): {message}")]
    Device {
        kind: DeviceErrorKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ParticipantState,
        to: ParticipantState,
    },

    #[error("record encode failed: {0}")]
    EncodeFailed(String),

    #[error("record decode failed: {0}")]
    DecodeFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl IpcError {
    /// Create a `Device` error with just a message.
    pub fn device(kind: DeviceErrorKind, msg: impl Into<String>) -> Self {
        Self::Device {
            kind,
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        kind: DeviceErrorKind,
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            kind,
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Project this error onto the terminal failure reason a participant records.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            IpcError::AuthorizationDenied { reason } => FailureReason::AuthorizationDenied(*reason),
            IpcError::Protocol(v) => FailureReason::Protocol(*v),
            IpcError::ReadyTimeout { .. } => FailureReason::Timeout,
            IpcError::Device { kind, .. } => FailureReason::Device(*kind),
            IpcError::Cancelled => FailureReason::Cancelled,
            IpcError::IllegalTransition { .. }
            | IpcError::EncodeFailed(_)
            | IpcError::DecodeFailed(_)
            | IpcError::Io(_)
            | IpcError::LockPoisoned(_) => FailureReason::Internal,
        }
    }
}
