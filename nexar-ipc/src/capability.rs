//! Isolation and security flags in effect for one deployment topology.
//!
//! A `CapabilitySet` is read from the deployment layer (environment, a
//! [`Topology`](crate::topology::Topology) preset, or explicit construction)
//! and never changes afterwards. The `with_*` methods consume and return a new
//! value rather than mutating in place.

/// Snapshot of the isolation flags governing cross-process device access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet {
    ipc_namespace_shared: bool,
    pid_visibility_shared: bool,
    privileged: bool,
    device_broker_present: bool,
}

impl CapabilitySet {
    /// Fully isolated topology: nothing shared, no privilege, no broker.
    pub const fn isolated() -> Self {
        Self {
            ipc_namespace_shared: false,
            pid_visibility_shared: false,
            privileged: false,
            device_broker_present: false,
        }
    }

    /// Construct from all four flags at once.
    pub const fn new(
        ipc_namespace_shared: bool,
        pid_visibility_shared: bool,
        privileged: bool,
        device_broker_present: bool,
    ) -> Self {
        Self {
            ipc_namespace_shared,
            pid_visibility_shared,
            privileged,
            device_broker_present,
        }
    }

    pub const fn with_ipc_namespace_shared(mut self, shared: bool) -> Self {
        self.ipc_namespace_shared = shared;
        self
    }

    /// Set when either a shared PID namespace or the host PID namespace is in effect.
    pub const fn with_pid_visibility_shared(mut self, shared: bool) -> Self {
        self.pid_visibility_shared = shared;
        self
    }

    pub const fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Set when a DRA-style broker has granted scoped device access.
    pub const fn with_device_broker(mut self, present: bool) -> Self {
        self.device_broker_present = present;
        self
    }

    pub const fn ipc_namespace_shared(&self) -> bool {
        self.ipc_namespace_shared
    }

    pub const fn pid_visibility_shared(&self) -> bool {
        self.pid_visibility_shared
    }

    pub const fn privileged(&self) -> bool {
        self.privileged
    }

    pub const fn device_broker_present(&self) -> bool {
        self.device_broker_present
    }

    /// Every one of the 16 flag combinations, in a stable order.
    pub fn all() -> impl Iterator<Item = CapabilitySet> {
        (0u8..16).map(|bits| {
            Self::new(
                bits & 0b1000 != 0,
                bits & 0b0100 != 0,
                bits & 0b0010 != 0,
                bits & 0b0001 != 0,
            )
        })
    }

    /// Load the effective flags from environment variables.
    ///
    /// Recognized variables (values `1/0`, `true/false`, `yes/no`, `on/off`):
    /// - `NEXAR_IPC_SHARED_IPC_NS`
    /// - `NEXAR_IPC_SHARED_PID_NS`
    /// - `NEXAR_IPC_HOST_PID` (either PID variable grants process visibility)
    /// - `NEXAR_IPC_PRIVILEGED`
    /// - `NEXAR_IPC_DEVICE_BROKER`
    ///
    /// Unset or unparseable variables count as `false`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).and_then(|v| parse_flag(&v)).unwrap_or(false);
        Self {
            ipc_namespace_shared: flag("NEXAR_IPC_SHARED_IPC_NS"),
            pid_visibility_shared: flag("NEXAR_IPC_SHARED_PID_NS") || flag("NEXAR_IPC_HOST_PID"),
            privileged: flag("NEXAR_IPC_PRIVILEGED"),
            device_broker_present: flag("NEXAR_IPC_DEVICE_BROKER"),
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ipc_ns={} pid={} privileged={} broker={}",
            self.ipc_namespace_shared,
            self.pid_visibility_shared,
            self.privileged,
            self.device_broker_present
        )
    }
}
