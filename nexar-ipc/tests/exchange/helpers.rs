use futures::future::BoxFuture;
use nexar_ipc::channel::ChannelState;
use nexar_ipc::device::{DeviceAllocation, MappedRegion};
use nexar_ipc::{
    ConsumerReport, DeviceIndex, EventSink, ExchangeChannel, ExchangeEvent, FileChannel,
    GpuIpcProvider, HostIpcProvider, IpcConfig, MemoryHandle, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A channel directory and a device root inside one temp dir.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub provider: Arc<HostIpcProvider>,
    pub channel: Arc<FileChannel>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(HostIpcProvider::new(dir.path().join("devices")).unwrap());
        let channel = Arc::new(FileChannel::open(dir.path().join("channel"), poll()).unwrap());
        Self {
            dir,
            provider,
            channel,
        }
    }

    /// A second, independent view of the same channel directory.
    pub fn reopen_channel(&self) -> Arc<FileChannel> {
        Arc::new(FileChannel::open(self.dir.path().join("channel"), poll()).unwrap())
    }

    /// A second, independent provider over the same device root.
    pub fn second_provider(&self) -> Arc<HostIpcProvider> {
        Arc::new(HostIpcProvider::new(self.dir.path().join("devices")).unwrap())
    }
}

fn poll() -> Duration {
    Duration::from_millis(1)
}

/// Short timeouts and a small pattern.
pub fn fast_config(pattern_len: usize) -> IpcConfig {
    IpcConfig {
        ready_timeout: Duration::from_secs(5),
        session_timeout: Duration::from_secs(10),
        poll_interval: poll(),
        pattern_len,
        ..IpcConfig::default()
    }
}

/// Delegating provider that stalls in `export_handle`, so readiness arrives
/// late.
pub struct SlowExport {
    pub inner: Arc<HostIpcProvider>,
    pub delay: Duration,
}

/// Delegating provider that zeroes the first element of every write.
pub struct Corrupting {
    pub inner: Arc<HostIpcProvider>,
}

impl GpuIpcProvider for SlowExport {
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation> {
        self.inner.allocate(size_bytes, device)
    }
    fn free(&self, alloc: &DeviceAllocation) -> Result<()> {
        self.inner.free(alloc)
    }
    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle> {
        std::thread::sleep(self.delay);
        self.inner.export_handle(alloc)
    }
    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion> {
        self.inner.import_handle(handle)
    }
    fn close_mapping(&self, region: &MappedRegion) -> Result<()> {
        self.inner.close_mapping(region)
    }
    unsafe fn write_bytes(&self, dst_ptr: u64, data: &[u8]) -> Result<()> {
        unsafe { self.inner.write_bytes(dst_ptr, data) }
    }
    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>> {
        unsafe { self.inner.read_bytes(src_ptr, size_bytes) }
    }
}

impl GpuIpcProvider for Corrupting {
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation> {
        self.inner.allocate(size_bytes, device)
    }
    fn free(&self, alloc: &DeviceAllocation) -> Result<()> {
        self.inner.free(alloc)
    }
    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle> {
        self.inner.export_handle(alloc)
    }
    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion> {
        self.inner.import_handle(handle)
    }
    fn close_mapping(&self, region: &MappedRegion) -> Result<()> {
        self.inner.close_mapping(region)
    }
    unsafe fn write_bytes(&self, dst_ptr: u64, data: &[u8]) -> Result<()> {
        let mut data = data.to_vec();
        if data.len() >= 4 {
            data[..4].copy_from_slice(&0u32.to_le_bytes());
        }
        unsafe { self.inner.write_bytes(dst_ptr, &data) }
    }
    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>> {
        unsafe { self.inner.read_bytes(src_ptr, size_bytes) }
    }
}

/// Delegating provider whose writes never reach memory, leaving every
/// allocation zero-filled.
pub struct NoWrite {
    pub inner: Arc<HostIpcProvider>,
}

impl GpuIpcProvider for NoWrite {
    fn allocate(&self, size_bytes: usize, device: DeviceIndex) -> Result<DeviceAllocation> {
        self.inner.allocate(size_bytes, device)
    }
    fn free(&self, alloc: &DeviceAllocation) -> Result<()> {
        self.inner.free(alloc)
    }
    fn export_handle(&self, alloc: &DeviceAllocation) -> Result<MemoryHandle> {
        self.inner.export_handle(alloc)
    }
    fn import_handle(&self, handle: &MemoryHandle) -> Result<MappedRegion> {
        self.inner.import_handle(handle)
    }
    fn close_mapping(&self, region: &MappedRegion) -> Result<()> {
        self.inner.close_mapping(region)
    }
    unsafe fn write_bytes(&self, _dst_ptr: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }
    unsafe fn read_bytes(&self, src_ptr: u64, size_bytes: usize) -> Result<Vec<u8>> {
        unsafe { self.inner.read_bytes(src_ptr, size_bytes) }
    }
}

/// Channel wrapper that counts handle reads.
pub struct CountingChannel {
    pub inner: Arc<FileChannel>,
    pub reads: AtomicUsize,
}

impl CountingChannel {
    pub fn new(inner: Arc<FileChannel>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ExchangeChannel for CountingChannel {
    fn publish(&self, handle: &MemoryHandle) -> Result<()> {
        self.inner.publish(handle)
    }
    fn signal_ready(&self) -> Result<()> {
        self.inner.signal_ready()
    }
    fn await_ready<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<()>> {
        self.inner.await_ready(timeout)
    }
    fn read_handle(&self) -> Result<MemoryHandle> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_handle()
    }
    fn report(&self, report: &ConsumerReport) -> Result<()> {
        self.inner.report(report)
    }
    fn read_report(&self) -> Result<Option<ConsumerReport>> {
        self.inner.read_report()
    }
    fn await_report<'a>(&'a self) -> BoxFuture<'a, Result<ConsumerReport>> {
        self.inner.await_report()
    }
    fn state(&self) -> Result<ChannelState> {
        self.inner.state()
    }
}

/// Event sink that keeps everything it sees.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<ExchangeEvent>>);

impl Recorder {
    pub fn events(&self) -> Vec<ExchangeEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: &ExchangeEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}
