//! Device runtime abstraction
//!
//! Every driver call the pool allocator issues goes through [`DeviceRuntime`].
//! `HipRuntime` (feature `rocm`) binds it to the HIP runtime, `DummyRuntime`
//! provides a host-only implementation for tests and GPU-less machines.
//!
//! Device addresses, streams and pools are opaque integer handles. They are
//! never dereferenced on the host.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::hip_backend::error::HipResult;

/// Opaque device address returned by a device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// The null device address
    pub const fn null() -> Self {
        DevicePtr(0)
    }

    pub const fn from_addr(addr: usize) -> Self {
        DevicePtr(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque stream handle (`hipStream_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(usize);

impl StreamHandle {
    pub const fn from_raw(raw: usize) -> Self {
        StreamHandle(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Opaque memory pool handle (`hipMemPool_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

impl PoolHandle {
    pub const fn from_raw(raw: usize) -> Self {
        PoolHandle(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Writable memory pool attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAttribute {
    /// Bytes the pool keeps reserved after frees before returning memory to the device
    ReleaseThreshold(u64),
    /// Allow reuse of memory freed on another stream once its free event completed
    ReuseFollowEventDependencies(bool),
    /// Allow reuse of memory freed on another stream without any dependency
    ReuseAllowOpportunistic(bool),
    /// Allow the driver to insert dependencies in order to reuse memory
    ReuseAllowInternalDependencies(bool),
}

/// Read-only memory pool usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolUsageAttribute {
    ReservedMemCurrent,
    ReservedMemHigh,
    UsedMemCurrent,
    UsedMemHigh,
}

/// Device memory as reported by `hipMemGetInfo`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub free: usize,
    pub total: usize,
}

/// Driver entry points used by the allocators in this crate.
///
/// Device selection is per calling thread, as in HIP: `set_device` only
/// affects the thread that calls it.
pub trait DeviceRuntime: Send + Sync + fmt::Debug {
    /// Number of visible devices
    fn device_count(&self) -> HipResult<i32>;

    /// Device current for the calling thread
    fn current_device(&self) -> HipResult<i32>;

    /// Make `device` current for the calling thread
    fn set_device(&self, device: i32) -> HipResult<()>;

    /// Driver version, encoded as `major * 10_000_000 + minor * 100_000 + patch`
    fn driver_version(&self) -> HipResult<i32>;

    /// Whether `device` supports stream-ordered memory pools
    fn memory_pools_supported(&self, device: i32) -> HipResult<bool>;

    /// Create a stream on the current device
    fn create_stream(&self) -> HipResult<StreamHandle>;

    fn destroy_stream(&self, stream: StreamHandle) -> HipResult<()>;

    /// Block until all work queued on `stream` has completed
    fn synchronize_stream(&self, stream: StreamHandle) -> HipResult<()>;

    /// The device's default memory pool. The pool is owned by the device.
    fn default_mem_pool(&self, device: i32) -> HipResult<PoolHandle>;

    fn set_pool_attribute(&self, pool: PoolHandle, attribute: PoolAttribute) -> HipResult<()>;

    fn pool_usage_attribute(&self, pool: PoolHandle, attribute: PoolUsageAttribute)
        -> HipResult<u64>;

    /// Synchronous allocation on the current device
    fn malloc(&self, size: usize) -> HipResult<DevicePtr>;

    /// Synchronous free
    fn free(&self, ptr: DevicePtr) -> HipResult<()>;

    /// Stream-ordered allocation from `pool`, ordered on `stream`
    fn malloc_from_pool_async(
        &self,
        size: usize,
        pool: PoolHandle,
        stream: StreamHandle,
    ) -> HipResult<DevicePtr>;

    /// Stream-ordered free, ordered on `stream`
    fn free_async(&self, ptr: DevicePtr, stream: StreamHandle) -> HipResult<()>;

    /// Free and total memory of the current device
    fn mem_get_info(&self) -> HipResult<MemoryInfo>;
}
