use crate::error::Result;
use crate::types::{DeviceIndex, MemoryHandle};

/// A device allocation owned by the process that created it.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceAllocation {
    ptr: u64,
    size_bytes: usize,
    device: DeviceIndex,
}

impl DeviceAllocation {
    pub fn new(ptr: u64, size_bytes: usize, device: DeviceIndex) -> Self {
        Self {
            ptr,
            size_bytes,
            device,
        }
    }

    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn device(&self) -> DeviceIndex {
        self.device
    }
}

/// A remote allocation mapped into this process through an imported handle.
#[derive(Debug, PartialEq, Eq)]
pub struct MappedRegion {
    ptr: u64,
    size_bytes: usize,
    device: DeviceIndex,
}

impl MappedRegion {
    pub fn new(ptr: u64, size_bytes: usize, device: DeviceIndex) -> Self {
        Self {
            ptr,
            size_bytes,
            device,
        }
    }

    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn device(&self) -> DeviceIndex {
        self.device
    }
}

/// The driver-side primitives the exchange needs.
///
/// nexar-ipc never allocates or maps device memory itself; it drives a
/// provider and feeds the provider's error kinds into the participants'
/// terminal states.
///
/// - `HostIpcProvider` (built-in): file-backed emulation of device memory.
/// - `CudaIpcProvider` (feature `cuda`): CUDA driver IPC via cudarc.
///
/// Pointers are raw `u64` device addresses, as elsewhere in nexar.
pub trait GpuIpcProvider: Send + Sync {
    /// Allocate `size_bytes` on `device`.
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation>;

    /// Release an allocation made by [`allocate`](Self::allocate).
    fn free(&self, alloc: &DeviceAllocation) -> Result<()>;

    /// Produce the opaque token a peer process can import.
    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle>;

    /// Map a peer's allocation into this process.
    ///
    /// Fails with `DeviceErrorKind::InvalidContext` when the owning context
    /// cannot be resolved, and `InvalidArgument` when the handle is malformed
    /// or stale.
    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion>;

    /// Unmap a region returned by [`import_handle`](Self::import_handle).
    fn close_mapping(&self, region: &MappedRegion) -> Result<()>;

    /// Copy host bytes into device memory.
    ///
    /// # Safety
    /// `dst_ptr` must lie inside a live allocation or mapping with at least
    /// `data.len()` bytes remaining.
    unsafe fn write_bytes(&self, dst_ptr: u64, data: &[u8]) -> Result<()>;

    /// Copy device memory into a host buffer.
    ///
    /// # Safety
    /// `src_ptr` must lie inside a live allocation or mapping with at least
    /// `size_bytes` bytes remaining.
    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>>;
}
