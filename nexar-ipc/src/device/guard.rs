//! RAII wrappers that tie a provider resource to its release call.

use crate::device::provider::{DeviceAllocation, GpuIpcProvider, MappedRegion};
use crate::error::{DeviceErrorKind, IpcError, Result};
use crate::types::{DeviceIndex, MemoryHandle};
use std::sync::Arc;

fn check_bounds(offset: usize, len: usize, size_bytes: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size_bytes => Ok(()),
        _ => Err(IpcError::device(
            DeviceErrorKind::InvalidArgument,
            format!("access [{offset}, +{len}) outside region of {size_bytes} bytes"),
        )),
    }
}

/// Device memory exclusively owned by the producer. Freed on drop.
pub struct OwnedAllocation {
    alloc: DeviceAllocation,
    provider: Arc<dyn GpuIpcProvider>,
}

impl OwnedAllocation {
    pub fn allocate(
        provider: Arc<dyn GpuIpcProvider>,
        size_bytes: usize,
        device: DeviceIndex,
    ) -> Result<Self> {
        let alloc = provider.allocate(size_bytes, device)?;
        Ok(Self { alloc, provider })
    }

    pub fn size_bytes(&self) -> usize {
        self.alloc.size_bytes()
    }

    pub fn device(&self) -> DeviceIndex {
        self.alloc.device()
    }

    /// Export a non-owning handle for a peer process.
    pub fn export(&self) -> Result<MemoryHandle> {
        self.provider.export_handle(&self.alloc)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.alloc.size_bytes())?;
        // Bounds checked against a live allocation owned by `self`.
        unsafe {
            self.provider
                .write_bytes(self.alloc.ptr() + offset as u64, data)
        }
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds(offset, len, self.alloc.size_bytes())?;
        unsafe { self.provider.read_bytes(self.alloc.ptr() + offset as u64, len) }
    }
}

impl Drop for OwnedAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.provider.free(&self.alloc) {
            tracing::warn!(device = self.alloc.device(), "failed to free allocation: {e}");
        }
    }
}

/// A peer's allocation mapped into this process. Unmapped on drop.
pub struct Mapping {
    region: MappedRegion,
    provider: Arc<dyn GpuIpcProvider>,
}

impl Mapping {
    pub fn import(provider: Arc<dyn GpuIpcProvider>, handle: &MemoryHandle) -> Result<Self> {
        let region = provider.import_handle(handle)?;
        Ok(Self { region, provider })
    }

    pub fn size_bytes(&self) -> usize {
        self.region.size_bytes()
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.region.size_bytes())?;
        unsafe {
            self.provider
                .write_bytes(self.region.ptr() + offset as u64, data)
        }
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds(offset, len, self.region.size_bytes())?;
        unsafe {
            self.provider
                .read_bytes(self.region.ptr() + offset as u64, len)
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = self.provider.close_mapping(&self.region) {
            tracing::warn!(device = self.region.device(), "failed to close mapping: {e}");
        }
    }
}
