//! Named deployment topologies and the capability sets they produce.
//!
//! Each preset is a point in the capability space that the oracle evaluates.
//! They exist so operators and tests can name a scenario instead of spelling
//! out four flags.

use crate::capability::CapabilitySet;
use crate::oracle::{self, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// Two processes on one host, no containers, run as root.
    BareMetal,
    /// Two pods with default isolation.
    TwoPods,
    /// Two privileged pods sharing the host IPC namespace only.
    TwoPodsSharedHostIpc,
    /// Two privileged pods sharing the host PID and IPC namespaces.
    TwoPodsHostPid,
    /// Two privileged containers in one pod with a shared process namespace.
    SinglePodSharedPid,
    /// As `SinglePodSharedPid` but unprivileged.
    SinglePodSharedPidUnprivileged,
    /// One pod with a shared process namespace whose GPU access is granted
    /// by a dynamic resource allocation broker instead of privilege.
    DraBroker,
}

impl Topology {
    pub fn all() -> [Topology; 7] {
        [
            Topology::BareMetal,
            Topology::TwoPods,
            Topology::TwoPodsSharedHostIpc,
            Topology::TwoPodsHostPid,
            Topology::SinglePodSharedPid,
            Topology::SinglePodSharedPidUnprivileged,
            Topology::DraBroker,
        ]
    }

    pub fn capabilities(&self) -> CapabilitySet {
        match self {
            Topology::BareMetal => CapabilitySet::new(true, true, true, false),
            Topology::TwoPods => CapabilitySet::isolated(),
            Topology::TwoPodsSharedHostIpc => CapabilitySet::new(true, false, true, false),
            Topology::TwoPodsHostPid => CapabilitySet::new(true, true, true, false),
            Topology::SinglePodSharedPid => CapabilitySet::new(true, true, true, false),
            Topology::SinglePodSharedPidUnprivileged => {
                CapabilitySet::new(true, true, false, false)
            }
            Topology::DraBroker => CapabilitySet::new(true, true, false, true),
        }
    }

    pub fn verdict(&self) -> Verdict {
        oracle::evaluate(&self.capabilities())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Topology::BareMetal => "bare-metal",
            Topology::TwoPods => "two-pods",
            Topology::TwoPodsSharedHostIpc => "two-pods-host-ipc",
            Topology::TwoPodsHostPid => "two-pods-host-pid",
            Topology::SinglePodSharedPid => "single-pod-shared-pid",
            Topology::SinglePodSharedPidUnprivileged => "single-pod-shared-pid-unprivileged",
            Topology::DraBroker => "dra-broker",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Topology::BareMetal => "two host processes, root, shared namespaces",
            Topology::TwoPods => "two pods, isolated namespaces, unprivileged",
            Topology::TwoPodsSharedHostIpc => "two privileged pods with hostIPC only",
            Topology::TwoPodsHostPid => "two privileged pods with hostPID and hostIPC",
            Topology::SinglePodSharedPid => "one pod, shareProcessNamespace, privileged",
            Topology::SinglePodSharedPidUnprivileged => {
                "one pod, shareProcessNamespace, unprivileged"
            }
            Topology::DraBroker => "one pod, shareProcessNamespace, GPU granted by DRA",
        }
    }

    /// Look a preset up by [`name`](Topology::name).
    pub fn from_name(name: &str) -> Option<Topology> {
        Topology::all().into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
