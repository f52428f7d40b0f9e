//! File-backed emulation of device memory and driver IPC.
//!
//! Each allocation is a file under a device root shared by every process on
//! the node (by default a directory in `/dev/shm`). The exported token names
//! the file by `(device, owner pid, allocation id)`; importing it opens the
//! same file, so writes from either side are visible to the other.
//!
//! Like the real driver, an import needs the owning process to be resolvable
//! from the importer: the owner pid must appear in this process's `/proc`.
//! Processes in disjoint PID namespaces fail with `InvalidContext`.

use crate::device::provider::{DeviceAllocation, GpuIpcProvider, MappedRegion};
use crate::error::{DeviceErrorKind, IpcError, Result};
use crate::types::{DeviceIndex, HANDLE_TOKEN_SIZE, MemoryHandle};
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const TOKEN_MAGIC: [u8; 8] = *b"nxhost01";

/// Base of the synthetic device address space handed out as pointers.
const VA_BASE: u64 = 0x7f00_0000_0000;

/// Address space reserved per region (64 GiB).
const VA_STRIDE: u64 = 1 << 36;

/// Allocation ids are unique per process so several providers sharing a
/// device root never collide on a backing file.
static NEXT_ALLOC_ID: AtomicU64 = AtomicU64::new(0);

struct HostRegion {
    file: File,
    path: PathBuf,
    size_bytes: usize,
    device: DeviceIndex,
    alloc_id: u64,
    /// `true` for allocations made here, `false` for imported mappings.
    owned: bool,
}

/// `GpuIpcProvider` that emulates device memory with shared files.
pub struct HostIpcProvider {
    root: PathBuf,
    pid: u32,
    next_slot: AtomicU64,
    regions: Mutex<HashMap<u64, HostRegion>>,
}

impl HostIpcProvider {
    /// Default device root shared by every process on the node.
    pub const DEFAULT_ROOT: &'static str = "/dev/shm/nexar-ipc-devices";

    /// Create a provider whose device memory lives under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            pid: std::process::id(),
            next_slot: AtomicU64::new(0),
            regions: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of live allocations and mappings held by this provider.
    pub fn live_regions(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, HostRegion>>> {
        self.regions
            .lock()
            .map_err(|_| IpcError::LockPoisoned("host regions"))
    }

    fn backing_path(&self, device: DeviceIndex, pid: u32, alloc_id: u64) -> PathBuf {
        self.root
            .join(format!("gpu{device}"))
            .join(format!("{pid}-{alloc_id}.mem"))
    }

    fn next_ptr(&self) -> u64 {
        VA_BASE + self.next_slot.fetch_add(1, Ordering::Relaxed) * VA_STRIDE
    }

    /// Resolve `ptr..ptr+len` to a region and the offset within it.
    fn with_region<T>(
        &self,
        ptr: u64,
        len: usize,
        f: impl FnOnce(&HostRegion, u64) -> std::io::Result<T>,
    ) -> Result<T> {
        let not_live = || {
            IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!("0x{ptr:x} is not inside a live region"),
            )
        };
        let slot = ptr.checked_sub(VA_BASE).ok_or_else(not_live)? / VA_STRIDE;
        let base = VA_BASE + slot * VA_STRIDE;
        let regions = self.lock()?;
        let region = regions.get(&base).ok_or_else(not_live)?;
        let offset = ptr - base;
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= region.size_bytes as u64);
        if !in_bounds {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!(
                    "access of {len} bytes at 0x{ptr:x} overruns region of {} bytes",
                    region.size_bytes
                ),
            ));
        }
        f(region, offset).map_err(|e| {
            IpcError::device_with_source(DeviceErrorKind::Driver, "backing file I/O failed", e)
        })
    }
}

fn encode_token(device: DeviceIndex, pid: u32, alloc_id: u64) -> [u8; HANDLE_TOKEN_SIZE] {
    let mut token = [0u8; HANDLE_TOKEN_SIZE];
    token[0..8].copy_from_slice(&TOKEN_MAGIC);
    token[8..12].copy_from_slice(&device.to_le_bytes());
    token[12..16].copy_from_slice(&pid.to_le_bytes());
    token[16..24].copy_from_slice(&alloc_id.to_le_bytes());
    token
}

/// Returns `(device, pid, alloc_id)`.
fn decode_token(token: &[u8; HANDLE_TOKEN_SIZE]) -> Option<(DeviceIndex, u32, u64)> {
    if token[0..8] != TOKEN_MAGIC {
        return None;
    }
    let device = u32::from_le_bytes(token[8..12].try_into().ok()?);
    let pid = u32::from_le_bytes(token[12..16].try_into().ok()?);
    let alloc_id = u64::from_le_bytes(token[16..24].try_into().ok()?);
    Some((device, pid, alloc_id))
}

/// Whether `pid` resolves to a live process from this PID namespace.
fn process_visible(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        Path::new("/proc").join(pid.to_string()).exists()
    } else {
        true
    }
}

impl GpuIpcProvider for HostIpcProvider {
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation> {
        if size_bytes == 0 {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                "zero-sized allocation",
            ));
        }
        if size_bytes as u64 > VA_STRIDE {
            return Err(IpcError::device(
                DeviceErrorKind::OutOfMemory,
                format!("{size_bytes} bytes exceeds the per-allocation limit of {VA_STRIDE}"),
            ));
        }

        let alloc_id = NEXT_ALLOC_ID.fetch_add(1, Ordering::Relaxed);
        let path = self.backing_path(device, self.pid, alloc_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(size_bytes as u64)?;

        let ptr = self.next_ptr();
        self.lock()?.insert(
            ptr,
            HostRegion {
                file,
                path: path.clone(),
                size_bytes,
                device,
                alloc_id,
                owned: true,
            },
        );
        tracing::debug!(device, size_bytes, path = %path.display(), "host allocation");
        Ok(DeviceAllocation::new(ptr, size_bytes, device))
    }

    fn free(&self, alloc: &DeviceAllocation) -> Result<()> {
        let region = {
            let mut regions = self.lock()?;
            let owned = regions.get(&alloc.ptr()).is_some_and(|r| r.owned);
            if owned { regions.remove(&alloc.ptr()) } else { None }
        };
        let region = region.ok_or_else(|| {
            IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!("0x{:x} is not an allocation of this provider", alloc.ptr()),
            )
        })?;
        match std::fs::remove_file(&region.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle> {
        let regions = self.lock()?;
        let region = regions
            .get(&alloc.ptr())
            .filter(|r| r.owned)
            .ok_or_else(|| {
                IpcError::device(
                    DeviceErrorKind::InvalidArgument,
                    format!("0x{:x} is not an allocation of this provider", alloc.ptr()),
                )
            })?;
        Ok(MemoryHandle::new(
            encode_token(region.device, self.pid, region.alloc_id),
            region.size_bytes as u64,
            region.device,
            self.pid,
        ))
    }

    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion> {
        let (device, pid, alloc_id) = decode_token(handle.token()).ok_or_else(|| {
            IpcError::device(DeviceErrorKind::InvalidArgument, "unrecognized handle token")
        })?;
        if device != handle.device() || pid != handle.owner_pid() {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                "handle token disagrees with handle metadata",
            ));
        }
        if !process_visible(pid) {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidContext,
                format!("owner process {pid} is not visible from this PID namespace"),
            ));
        }

        let path = self.backing_path(device, pid, alloc_id);
        let file = match std::fs::OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IpcError::device(
                    DeviceErrorKind::InvalidArgument,
                    format!("no live allocation behind handle ({})", path.display()),
                ));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(IpcError::device_with_source(
                    DeviceErrorKind::InvalidContext,
                    "device memory not accessible from this process",
                    e,
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let actual = file.metadata()?.len();
        if actual != handle.size_bytes() {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!(
                    "handle claims {} bytes but allocation has {actual}",
                    handle.size_bytes()
                ),
            ));
        }

        let size_bytes = actual as usize;
        let ptr = self.next_ptr();
        self.lock()?.insert(
            ptr,
            HostRegion {
                file,
                path,
                size_bytes,
                device,
                alloc_id,
                owned: false,
            },
        );
        tracing::debug!(device, owner_pid = pid, size_bytes, "handle imported");
        Ok(MappedRegion::new(ptr, size_bytes, device))
    }

    fn close_mapping(&self, region: &MappedRegion) -> Result<()> {
        let mut regions = self.lock()?;
        let mapped = regions.get(&region.ptr()).is_some_and(|r| !r.owned);
        if !mapped {
            return Err(IpcError::device(
                DeviceErrorKind::InvalidArgument,
                format!("0x{:x} is not a mapping of this provider", region.ptr()),
            ));
        }
        regions.remove(&region.ptr());
        Ok(())
    }

    unsafe fn write_bytes(&self, dst_ptr: u64, data: &[u8]) -> Result<()> {
        self.with_region(dst_ptr, data.len(), |region, offset| {
            region.file.write_all_at(data, offset)
        })
    }

    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>> {
        self.with_region(src_ptr, size_bytes, |region, offset| {
            let mut buf = vec![0u8; size_bytes];
            region.file.read_exact_at(&mut buf, offset)?;
            Ok(buf)
        })
    }
}
