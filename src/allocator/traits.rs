//! Allocator interface

use crate::allocator::stats::AllocatorStats;
use crate::backend::runtime::DevicePtr;

/// Device memory allocator
///
/// Every address passed to [`DeviceAllocator::deallocate`] must come from
/// [`DeviceAllocator::allocate`] on the same allocator and must not have been
/// freed already.
pub trait DeviceAllocator: Send + Sync + std::fmt::Debug {
    /// Stable, human-readable allocator name
    fn name(&self) -> &str;

    /// Allocate `size` bytes. `None` means the allocation failed; failure is
    /// an ordinary outcome, never a panic.
    fn allocate(&self, alignment: usize, size: usize) -> Option<DevicePtr>;

    /// Release an address returned by [`DeviceAllocator::allocate`]
    fn deallocate(&self, ptr: DevicePtr);

    /// Whether the size queries below are supported
    fn tracks_allocation_sizes(&self) -> bool {
        false
    }

    /// Size requested for the live allocation at `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if sizes are not tracked or `ptr` is not a live allocation.
    fn requested_size(&self, ptr: DevicePtr) -> usize {
        panic!(
            "{} does not track allocation sizes (queried {})",
            self.name(),
            ptr
        );
    }

    /// Size actually reserved for `ptr`; at least [`DeviceAllocator::requested_size`]
    fn allocated_size(&self, ptr: DevicePtr) -> usize {
        self.requested_size(ptr)
    }

    /// Usage statistics, if collected
    fn stats(&self) -> Option<AllocatorStats> {
        None
    }

    /// Start a new statistics window
    fn clear_stats(&self) {}
}
