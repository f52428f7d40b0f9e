use crate::error::{DeviceErrorKind, IpcError, ProtocolViolation, Result};
use crate::oracle::DenyReason;

/// Which side of the exchange a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Lifecycle position shared by both roles.
///
/// ```text
/// Idle -> Allocated -> HandlePublished (producer) -> Verifying -> Terminal
///                   -> HandleConsumed  (consumer) ->
/// ```
///
/// Any non-terminal state may jump straight to `Terminal` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    Idle,
    Allocated,
    HandlePublished,
    HandleConsumed,
    Verifying,
    Terminal,
}

impl std::fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParticipantState::Idle => "idle",
            ParticipantState::Allocated => "allocated",
            ParticipantState::HandlePublished => "handle-published",
            ParticipantState::HandleConsumed => "handle-consumed",
            ParticipantState::Verifying => "verifying",
            ParticipantState::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Why a participant ended in `Terminal::Failed`.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum FailureReason {
    AuthorizationDenied(DenyReason),
    Protocol(ProtocolViolation),
    Device(DeviceErrorKind),
    Timeout,
    Cancelled,
    /// Local I/O, codec or bookkeeping failure.
    Internal,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::AuthorizationDenied(r) => write!(f, "authorization denied: {r}"),
            FailureReason::Protocol(v) => write!(f, "protocol error: {v}"),
            FailureReason::Device(k) => write!(f, "device error: {k}"),
            FailureReason::Timeout => f.write_str("timed out"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Internal => f.write_str("internal error"),
        }
    }
}

/// Terminal result of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Verified { checksum: u64 },
    DataMismatch { expected: u64, actual: u64 },
    Failed(FailureReason),
}

impl Terminal {
    pub fn is_verified(&self) -> bool {
        matches!(self, Terminal::Verified { .. })
    }
}

/// Tracks one participant's position and rejects out-of-order steps.
#[derive(Debug)]
pub(crate) struct StateMachine {
    role: Role,
    state: ParticipantState,
}

impl StateMachine {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            state: ParticipantState::Idle,
        }
    }

    pub(crate) fn state(&self) -> ParticipantState {
        self.state
    }

    /// Move to `next`, failing with `IllegalTransition` if the role's
    /// sequence does not allow it.
    pub(crate) fn advance(&mut self, next: ParticipantState) -> Result<()> {
        if !is_legal(self.role, self.state, next) {
            return Err(IpcError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(role = %self.role, from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }
}

fn is_legal(role: Role, from: ParticipantState, to: ParticipantState) -> bool {
    use ParticipantState::*;
    match (from, to) {
        (Terminal, _) => false,
        (_, Terminal) => true,
        (Idle, Allocated) => true,
        (Allocated, HandlePublished) => role == Role::Producer,
        (Allocated, HandleConsumed) => role == Role::Consumer,
        (HandlePublished, Verifying) => role == Role::Producer,
        (HandleConsumed, Verifying) => role == Role::Consumer,
        _ => false,
    }
}
