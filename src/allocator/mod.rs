//! Device allocators
//!
//! - [`HipPoolAllocator`]: stream-ordered allocations from the device's default memory pool
//! - [`DeviceMallocAllocator`]: plain synchronous device allocations, usable as a fallback

pub mod device_malloc;
pub mod pool;
pub mod stats;
pub mod traits;

pub use device_malloc::DeviceMallocAllocator;
pub use pool::{HipPoolAllocator, PoolUsage};
pub use stats::AllocatorStats;
pub use traits::DeviceAllocator;
