//! CUDA driver IPC provider.
//!
//! Allocates with `cuMemAlloc`, exports with `cuIpcGetMemHandle` and maps a
//! peer's handle with `cuIpcOpenMemHandle`. The driver refuses to open a
//! handle exported by the calling process itself, so producer and consumer
//! must run in different processes.

use crate::device::provider::{DeviceAllocation, GpuIpcProvider, MappedRegion};
use crate::error::{DeviceErrorKind, IpcError, Result};
use crate::types::{DeviceIndex, HANDLE_TOKEN_SIZE, MemoryHandle};
use cudarc::driver::result::DriverError;
use cudarc::driver::sys;
use std::sync::Arc;

fn driver_error(op: &str, e: DriverError) -> IpcError {
    let kind = match e.0 {
        sys::CUresult::CUDA_ERROR_INVALID_CONTEXT
        | sys::CUresult::CUDA_ERROR_CONTEXT_IS_DESTROYED => DeviceErrorKind::InvalidContext,
        sys::CUresult::CUDA_ERROR_INVALID_VALUE | sys::CUresult::CUDA_ERROR_INVALID_HANDLE => {
            DeviceErrorKind::InvalidArgument
        }
        sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY => DeviceErrorKind::OutOfMemory,
        _ => DeviceErrorKind::Driver,
    };
    IpcError::device_with_source(kind, format!("{op} failed"), e)
}

/// `GpuIpcProvider` for NVIDIA GPUs using cudarc.
pub struct CudaIpcProvider {
    ctx: Arc<cudarc::driver::CudaContext>,
    device: DeviceIndex,
}

impl CudaIpcProvider {
    /// Create a provider bound to the given GPU ordinal.
    pub fn new(device: DeviceIndex) -> Result<Self> {
        let ctx = cudarc::driver::CudaContext::new(device as usize)
            .map_err(|e| driver_error("cuCtxCreate", e))?;
        Ok(Self { ctx, device })
    }

    fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| driver_error("bind_to_thread", e))
    }

    fn check_device(&self, device: DeviceIndex) -> Result<()> {
        if device != self.device {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!("provider bound to GPU {}, asked for GPU {device}", self.device),
            ));
        }
        Ok(())
    }
}

impl GpuIpcProvider for CudaIpcProvider {
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation> {
        self.check_device(device)?;
        self.bind()?;
        let ptr = unsafe { cudarc::driver::result::malloc_sync(size_bytes) }
            .map_err(|e| driver_error("cuMemAlloc", e))?;
        unsafe { cudarc::driver::result::memset_d8_sync(ptr, 0, size_bytes) }
            .map_err(|e| driver_error("cuMemsetD8", e))?;
        Ok(DeviceAllocation::new(ptr, size_bytes, device))
    }

    fn free(&self, alloc: &DeviceAllocation) -> Result<()> {
        self.bind()?;
        unsafe { cudarc::driver::result::free_sync(alloc.ptr() as sys::CUdeviceptr) }
            .map_err(|e| driver_error("cuMemFree", e))
    }

    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle> {
        self.bind()?;
        let mut raw = std::mem::MaybeUninit::<sys::CUipcMemHandle>::zeroed();
        unsafe { sys::cuIpcGetMemHandle(raw.as_mut_ptr(), alloc.ptr() as sys::CUdeviceptr) }
            .result()
            .map_err(|e| driver_error("cuIpcGetMemHandle", e))?;
        let raw = unsafe { raw.assume_init() };

        let mut token = [0u8; HANDLE_TOKEN_SIZE];
        for (dst, src) in token.iter_mut().zip(raw.reserved.iter()) {
            *dst = *src as u8;
        }
        Ok(MemoryHandle::new(
            token,
            alloc.size_bytes() as u64,
            alloc.device(),
            std::process::id(),
        ))
    }

    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion> {
        self.check_device(handle.device())?;
        self.bind()?;
        let mut raw = unsafe { std::mem::zeroed::<sys::CUipcMemHandle>() };
        for (dst, src) in raw.reserved.iter_mut().zip(handle.token().iter()) {
            *dst = *src as _;
        }
        let mut ptr: sys::CUdeviceptr = 0;
        unsafe {
            sys::cuIpcOpenMemHandle_v2(
                &mut ptr,
                raw,
                sys::CUipcMem_flags::CU_IPC_MEM_LAZY_ENABLE_PEER_ACCESS as u32,
            )
        }
        .result()
        .map_err(|e| driver_error("cuIpcOpenMemHandle", e))?;
        Ok(MappedRegion::new(
            ptr,
            handle.size_bytes() as usize,
            handle.device(),
        ))
    }

    fn close_mapping(&self, region: &MappedRegion) -> Result<()> {
        self.bind()?;
        unsafe { sys::cuIpcCloseMemHandle(region.ptr() as sys::CUdeviceptr) }
            .result()
            .map_err(|e| driver_error("cuIpcCloseMemHandle", e))
    }

    unsafe fn write_bytes(&self, dst_ptr: u64, data: &[u8]) -> Result<()> {
        self.bind()?;
        unsafe { cudarc::driver::result::memcpy_htod_sync(dst_ptr as sys::CUdeviceptr, data) }
            .map_err(|e| driver_error("cuMemcpyHtoD", e))
    }

    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>> {
        self.bind()?;
        let mut buf = vec![0u8; size_bytes];
        unsafe { cudarc::driver::result::memcpy_dtoh_sync(&mut buf, src_ptr as sys::CUdeviceptr) }
            .map_err(|e| driver_error("cuMemcpyDtoH", e))?;
        Ok(buf)
    }
}
