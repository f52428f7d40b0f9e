/// Ordinal of a GPU on the node (0-indexed).
pub type DeviceIndex = u32;

/// Size of the opaque handle token in bytes. Matches `CUipcMemHandle`.
pub const HANDLE_TOKEN_SIZE: usize = 64;

/// Current channel record format version.
pub const FORMAT_VERSION: u16 = 1;

/// Opaque capability token referencing a remote GPU allocation.
///
/// Created by the producer from its allocation and consumed read-only by the
/// consumer. The handle grants mapping rights; it does not own the memory.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    token: [u8; HANDLE_TOKEN_SIZE],
    size_bytes: u64,
    device: DeviceIndex,
    owner_pid: u32,
}

impl MemoryHandle {
    pub fn new(
        token: [u8; HANDLE_TOKEN_SIZE],
        size_bytes: u64,
        device: DeviceIndex,
        owner_pid: u32,
    ) -> Self {
        Self {
            token,
            size_bytes,
            device,
            owner_pid,
        }
    }

    /// Raw driver token bytes.
    pub fn token(&self) -> &[u8; HANDLE_TOKEN_SIZE] {
        &self.token
    }

    /// Size of the referenced allocation.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn device(&self) -> DeviceIndex {
        self.device
    }

    /// Producer pid as seen from the producer's own PID namespace.
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }
}

impl std::fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemoryHandle(device={}, size={}B, owner_pid={})",
            self.device, self.size_bytes, self.owner_pid
        )
    }
}
