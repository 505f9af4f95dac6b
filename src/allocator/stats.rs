//! Allocator usage statistics

use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of an allocator's usage counters
///
/// `bytes_in_use` always equals the sum of the sizes of the live allocations
/// and never exceeds `peak_bytes_in_use`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Successful allocations since the last reset
    pub num_allocs: u64,
    /// Bytes currently handed out
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use` since the last reset
    pub peak_bytes_in_use: usize,
    /// Largest single request since the last reset
    pub largest_alloc_size: usize,
    /// Configured pool release threshold, once it has been set
    pub bytes_limit: Option<usize>,
}

impl AllocatorStats {
    /// Account for a successful allocation of `size` bytes
    pub(crate) fn record_alloc(&mut self, size: usize) {
        self.num_allocs += 1;
        self.bytes_in_use += size;
        self.peak_bytes_in_use = self.peak_bytes_in_use.max(self.bytes_in_use);
        self.largest_alloc_size = self.largest_alloc_size.max(size);
    }

    /// Account for a released allocation of `size` bytes. Peak is untouched.
    pub(crate) fn record_free(&mut self, size: usize) {
        self.bytes_in_use = self.bytes_in_use.saturating_sub(size);
    }

    /// Start a new observation window.
    ///
    /// Live memory stays accounted for: peak restarts from the current usage,
    /// not from zero.
    pub(crate) fn reset_window(&mut self) {
        self.num_allocs = 0;
        self.largest_alloc_size = 0;
        self.peak_bytes_in_use = self.bytes_in_use;
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Limit:        {}", self.bytes_limit.unwrap_or(0))?;
        writeln!(f, "InUse:        {}", self.bytes_in_use)?;
        writeln!(f, "MaxInUse:     {}", self.peak_bytes_in_use)?;
        writeln!(f, "NumAllocs:    {}", self.num_allocs)?;
        write!(f, "MaxAllocSize: {}", self.largest_alloc_size)
    }
}
