mod guard;
mod host;
mod provider;
#[cfg(feature = "cuda")]
mod cuda;

#[cfg(feature = "cuda")]
pub use cuda::CudaIpcProvider;
pub use guard::{Mapping, OwnedAllocation};
pub use host::HostIpcProvider;
pub use provider::{DeviceAllocation, GpuIpcProvider, MappedRegion};
