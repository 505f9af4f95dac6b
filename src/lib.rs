//! ROCmForge pool allocator
//!
//! Device memory allocator for AMD GPUs built on HIP's stream-ordered memory
//! pools. Physical allocation is left to the driver's pool; this crate adds a
//! per-device allocator identity, per-address size tracking, usage
//! statistics, an optional deterministic reuse mode and optional pool
//! pre-warming.
//!
//! Without the `rocm` feature only the host-side [`DummyRuntime`] is
//! available, which is what the unit tests run against.

#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod allocator;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;

pub use allocator::{
    AllocatorStats, DeviceAllocator, DeviceMallocAllocator, HipPoolAllocator, PoolUsage,
};
pub use backend::{DevicePtr, DeviceRuntime, DummyRuntime, HipError, HipResult, MemoryInfo};
#[cfg(feature = "rocm")]
pub use backend::{gpu_available, HipRuntime};
pub use config::{FallbackPolicy, PoolAllocatorConfig, PrimaryContextWorkaround};
pub use error::{AllocatorError, AllocatorResult, ErrorCategory};
pub use logging::{init_logging_default, init_with_config, LoggingConfig};
