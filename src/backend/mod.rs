//! Device runtime layer: driver seam, HIP bindings and the dummy test runtime

pub mod device_context;
pub mod dummy_runtime;
pub mod hip_backend;
pub mod runtime;
pub mod stream;

pub use device_context::ScopedDeviceActivation;
pub use dummy_runtime::{DummyEvent, DummyPoolAttributes, DummyRuntime};
pub use hip_backend::{HipError, HipResult};
#[cfg(feature = "rocm")]
pub use hip_backend::{gpu_available, HipRuntime};
pub use runtime::{
    DevicePtr, DeviceRuntime, MemoryInfo, PoolAttribute, PoolHandle, PoolUsageAttribute,
    StreamHandle,
};
pub use stream::HipStream;
