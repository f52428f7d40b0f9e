//! Authorization oracle: decides whether a remote process may map another
//! process's GPU allocation under a given [`CapabilitySet`].

use crate::capability::CapabilitySet;
use crate::error::{IpcError, Result};

/// Why a cross-process mapping is refused.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum DenyReason {
    /// The consumer cannot resolve the producer's process, so the GPU
    /// context owning the handle is unreachable.
    NoProcessVisibility,
    /// Raw device-node access needs either privilege or a broker grant.
    NoPrivilegeAndNoBroker,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NoProcessVisibility => f.write_str("no shared process visibility"),
            DenyReason::NoPrivilegeAndNoBroker => {
                f.write_str("neither privileged nor brokered device access")
            }
        }
    }
}

/// Result of evaluating a [`CapabilitySet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// `Ok(())` on `Allow`, `AuthorizationDenied` otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(reason) => Err(IpcError::AuthorizationDenied { reason }),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::Deny(reason) => write!(f, "deny ({reason})"),
        }
    }
}

/// Evaluate the authorization rules in priority order.
///
/// 1. No shared process visibility: `Deny(NoProcessVisibility)`.
/// 2. Neither privileged nor brokered: `Deny(NoPrivilegeAndNoBroker)`.
/// 3. Otherwise `Allow`.
///
/// `ipc_namespace_shared` is deliberately not consulted. Toggling it alone
/// never changes whether the remote open succeeds.
pub fn evaluate(caps: &CapabilitySet) -> Verdict {
    if !caps.pid_visibility_shared() {
        return Verdict::Deny(DenyReason::NoProcessVisibility);
    }
    if !caps.privileged() && !caps.device_broker_present() {
        return Verdict::Deny(DenyReason::NoPrivilegeAndNoBroker);
    }
    Verdict::Allow
}

/// The verdict for every flag combination, in [`CapabilitySet::all`] order.
pub fn truth_table() -> Vec<(CapabilitySet, Verdict)> {
    CapabilitySet::all().map(|c| (c, evaluate(&c))).collect()
}
