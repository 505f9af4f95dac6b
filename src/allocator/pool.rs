//! Stream-ordered memory pool allocator
//!
//! [`HipPoolAllocator`] hands allocation and deallocation to the device's
//! default memory pool (`hipMallocFromPoolAsync` / `hipFreeAsync`) on a
//! private stream, and keeps the per-address sizes and usage statistics the
//! pool itself does not expose.
//!
//! # Ordering
//!
//! Every pool operation of one allocator is queued on its private stream, so
//! they execute in issue order relative to each other. Nothing orders them
//! against other streams; callers that hand an address to work on another
//! stream must synchronize the two streams themselves. The returned address
//! may be used by work queued after the allocation without waiting for it to
//! complete on the device.
//!
//! # Failure model
//!
//! Construction never fails. A device without pool support, or a stream or
//! pool that cannot be obtained, leaves the allocator *unavailable*: every
//! allocation returns `None` (unless a fallback is configured, see
//! [`FallbackPolicy`]) and the statistics stay at zero. Allocation failures
//! return `None` and log device memory plus the statistics snapshot. Free
//! failures are logged and the bookkeeping is reconciled anyway.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rocmforge_pool::{DeviceAllocator, DummyRuntime, HipPoolAllocator, PoolAllocatorConfig};
//!
//! let runtime = Arc::new(DummyRuntime::new(1));
//! let allocator = HipPoolAllocator::new(runtime, None, PoolAllocatorConfig::new(0, 1 << 30));
//! let ptr = allocator.allocate(256, 1024).expect("allocation failed");
//! assert_eq!(allocator.requested_size(ptr), 1024);
//! allocator.deallocate(ptr);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::allocator::stats::AllocatorStats;
use crate::allocator::traits::DeviceAllocator;
use crate::backend::device_context::ScopedDeviceActivation;
use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::runtime::{
    DevicePtr, DeviceRuntime, PoolAttribute, PoolHandle, PoolUsageAttribute,
};
use crate::backend::stream::HipStream;
use crate::config::{FallbackPolicy, PoolAllocatorConfig, PrimaryContextWorkaround};

/// Size of the throwaway allocation that initializes device 0's context
const PRIMARY_CONTEXT_TOUCH_BYTES: usize = 1024;

/// Driver-side usage counters of the memory pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    /// Bytes the pool currently holds from the device
    pub reserved_current: u64,
    pub reserved_high: u64,
    /// Bytes of the reservation handed out to allocations
    pub used_current: u64,
    pub used_high: u64,
}

impl fmt::Display for PoolUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reserved {} (high {}), used {} (high {})",
            self.reserved_current, self.reserved_high, self.used_current, self.used_high
        )
    }
}

#[derive(Debug)]
enum PoolState {
    Ready { pool: PoolHandle, stream: HipStream },
    Unavailable { reason: String },
}

/// Statistics and live sizes, guarded together by one mutex
#[derive(Debug, Default)]
struct Bookkeeping {
    stats: AllocatorStats,
    sizes: HashMap<DevicePtr, usize>,
}

/// Device allocator backed by the device's stream-ordered default memory pool
#[derive(Debug)]
pub struct HipPoolAllocator {
    name: String,
    config: PoolAllocatorConfig,
    runtime: Arc<dyn DeviceRuntime>,
    state: PoolState,
    fallback: Option<Box<dyn DeviceAllocator>>,
    book: Mutex<Bookkeeping>,
}

impl HipPoolAllocator {
    /// Create an allocator on `config.device_id`'s default memory pool.
    ///
    /// `fallback` is owned by the allocator and released with it; whether it
    /// is ever called is decided by `config.fallback_policy`.
    ///
    /// Never fails: problems are logged and leave the allocator unavailable,
    /// see [`HipPoolAllocator::is_pool_available`].
    pub fn new(
        runtime: Arc<dyn DeviceRuntime>,
        fallback: Option<Box<dyn DeviceAllocator>>,
        config: PoolAllocatorConfig,
    ) -> Self {
        let mut allocator = Self {
            name: format!("hip_async_{}", config.device_id),
            config,
            runtime,
            state: PoolState::Unavailable {
                reason: "not initialized".to_string(),
            },
            fallback,
            book: Mutex::new(Bookkeeping::default()),
        };

        allocator.state = match allocator.initialize_pool() {
            Ok((pool, stream)) => {
                tracing::debug!(
                    "{}: initialized on device {} with pool size {} (deterministic={})",
                    allocator.name,
                    allocator.config.device_id,
                    allocator.config.pool_size,
                    allocator.config.deterministic
                );
                PoolState::Ready { pool, stream }
            }
            Err(e) => {
                tracing::error!(
                    "{}: stream-ordered memory pool unavailable, allocations will fail. \
                     Possible causes: device not supported, driver too old. Error: {}",
                    allocator.name,
                    e
                );
                PoolState::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        if allocator.config.reserve_memory {
            allocator.prewarm();
        }

        allocator
    }

    /// Create an allocator on the HIP runtime without a fallback
    #[cfg(feature = "rocm")]
    pub fn with_hip_runtime(config: PoolAllocatorConfig) -> HipResult<Self> {
        let runtime = crate::backend::hip_backend::HipRuntime::new()?;
        Ok(Self::new(Arc::new(runtime), None, config))
    }

    /// Resolve the device, create the private stream and configure the pool
    fn initialize_pool(&self) -> HipResult<(PoolHandle, HipStream)> {
        let device = self.config.device_id;
        let device_count = self.runtime.device_count()?;
        if device < 0 || device >= device_count {
            return Err(HipError::DeviceNotFound(device));
        }

        self.touch_primary_context();

        let _ctx = ScopedDeviceActivation::activate(self.runtime.as_ref(), device)?;
        if !self.runtime.memory_pools_supported(device)? {
            return Err(HipError::MemoryPoolsUnsupported(device));
        }

        let stream = HipStream::new(self.runtime.clone())?;
        let pool = self.runtime.default_mem_pool(device)?;

        let threshold = PoolAttribute::ReleaseThreshold(self.config.pool_size as u64);
        if let Err(e) = self.runtime.set_pool_attribute(pool, threshold) {
            tracing::error!(
                "{}: could not set the pool release threshold to {}: {}",
                self.name,
                self.config.pool_size,
                e
            );
        }
        self.book().stats.bytes_limit = Some(self.config.pool_size);

        if self.config.deterministic {
            for attribute in [
                PoolAttribute::ReuseAllowOpportunistic(false),
                PoolAttribute::ReuseAllowInternalDependencies(false),
            ] {
                if let Err(e) = self.runtime.set_pool_attribute(pool, attribute) {
                    tracing::warn!(
                        "{}: could not apply deterministic reuse policy {:?}: {}",
                        self.name,
                        attribute,
                        e
                    );
                }
            }
        }

        Ok((pool, stream))
    }

    /// Initialize device 0's context before any other device's pool is touched.
    ///
    /// Older drivers fail pool setup on secondary devices otherwise. Best
    /// effort: every failure here is only logged.
    fn touch_primary_context(&self) {
        let device = self.config.device_id;
        let policy = self.config.primary_context_workaround;
        if device <= 0 || policy == PrimaryContextWorkaround::Never {
            return;
        }

        let driver_version = match self.runtime.driver_version() {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::debug!("{}: driver version unknown: {}", self.name, e);
                None
            }
        };
        if !policy.applies(device, driver_version) {
            tracing::trace!(
                "{}: driver {:?} does not need the device 0 context touch",
                self.name,
                driver_version
            );
            return;
        }

        let _ctx = match ScopedDeviceActivation::activate(self.runtime.as_ref(), 0) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!("{}: could not activate device 0: {}", self.name, e);
                return;
            }
        };
        match self.runtime.malloc(PRIMARY_CONTEXT_TOUCH_BYTES) {
            Ok(ptr) => {
                if let Err(e) = self.runtime.free(ptr) {
                    tracing::warn!("{}: device 0 context touch free failed: {}", self.name, e);
                }
            }
            Err(e) => {
                tracing::warn!("{}: device 0 context touch failed: {}", self.name, e);
            }
        }
    }

    /// Make the pool reserve `pool_size` bytes now instead of growing lazily
    fn prewarm(&self) {
        if !self.is_pool_available() {
            tracing::warn!("{}: pool unavailable, skipping pre-fill", self.name);
            return;
        }

        match self.allocate(0, self.config.pool_size) {
            Some(ptr) => {
                self.deallocate(ptr);
                tracing::debug!(
                    "{}: pre-filled the pool with {} bytes",
                    self.name,
                    self.config.pool_size
                );
            }
            None => tracing::warn!(
                "{}: could not pre-fill the pool with {} bytes",
                self.name,
                self.config.pool_size
            ),
        }
        self.clear_stats();
    }

    fn book(&self) -> MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("{}: bookkeeping lock poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }

    fn record_allocation(&self, ptr: DevicePtr, size: usize) {
        let previous = {
            let mut book = self.book();
            book.stats.record_alloc(size);
            // A zero-byte request may come back as the null address; it is
            // counted but there is nothing to free later.
            if ptr.is_null() {
                None
            } else {
                book.sizes.insert(ptr, size)
            }
        };
        debug_assert!(
            previous.is_none(),
            "{}: address {} handed out while still live",
            self.name,
            ptr
        );
    }

    fn allocate_from_fallback(&self, alignment: usize, size: usize) -> Option<DevicePtr> {
        match (self.config.fallback_policy, &self.fallback) {
            (FallbackPolicy::WhenPoolUnavailable, Some(fallback)) => {
                let ptr = fallback.allocate(alignment, size)?;
                self.record_allocation(ptr, size);
                tracing::trace!(
                    "{}: allocated {} bytes at {} from fallback {}",
                    self.name,
                    size,
                    ptr,
                    fallback.name()
                );
                Some(ptr)
            }
            _ => {
                tracing::debug!(
                    "{}: pool unavailable, refusing allocation of {} bytes",
                    self.name,
                    size
                );
                None
            }
        }
    }

    /// Log a failed driver call with device memory, pool usage and statistics
    fn log_failure(&self, what: fmt::Arguments<'_>, error: &HipError) {
        let memory = {
            let _ctx = ScopedDeviceActivation::activate(self.runtime.as_ref(), self.config.device_id);
            match self.runtime.mem_get_info() {
                Ok(info) => format!("{} {}", info.free, info.total),
                Err(e) => format!("unavailable ({})", e),
            }
        };
        let pool = self
            .pool_usage()
            .map(|usage| usage.to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        let stats = self.book().stats;

        tracing::error!(
            "{}: {}. Error: {}\n Free Total: {}\n Pool: {}\nStats:\n{}",
            self.name,
            what,
            error,
            memory,
            pool,
            stats
        );
    }

    /// Allocator name, `hip_async_<device>`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> i32 {
        self.config.device_id
    }

    pub fn config(&self) -> &PoolAllocatorConfig {
        &self.config
    }

    /// Whether the memory pool and private stream were set up successfully
    pub fn is_pool_available(&self) -> bool {
        matches!(self.state, PoolState::Ready { .. })
    }

    /// Why the pool is unavailable, if it is
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            PoolState::Ready { .. } => None,
            PoolState::Unavailable { reason } => Some(reason),
        }
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.book().sizes.len()
    }

    /// Block until every pool operation queued by this allocator has completed
    pub fn synchronize(&self) -> HipResult<()> {
        match &self.state {
            PoolState::Ready { stream, .. } => {
                let _ctx =
                    ScopedDeviceActivation::activate(self.runtime.as_ref(), self.config.device_id)?;
                stream.synchronize()
            }
            PoolState::Unavailable { .. } => Ok(()),
        }
    }

    /// Driver-side reserved/used counters of the pool
    pub fn pool_usage(&self) -> Option<PoolUsage> {
        let PoolState::Ready { pool, .. } = &self.state else {
            return None;
        };

        let query = |attribute| self.runtime.pool_usage_attribute(*pool, attribute);
        let usage = (|| -> HipResult<PoolUsage> {
            Ok(PoolUsage {
                reserved_current: query(PoolUsageAttribute::ReservedMemCurrent)?,
                reserved_high: query(PoolUsageAttribute::ReservedMemHigh)?,
                used_current: query(PoolUsageAttribute::UsedMemCurrent)?,
                used_high: query(PoolUsageAttribute::UsedMemHigh)?,
            })
        })();

        match usage {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::debug!("{}: pool usage query failed: {}", self.name, e);
                None
            }
        }
    }
}

impl DeviceAllocator for HipPoolAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    /// `alignment` is accepted for interface compatibility; pool allocations
    /// are already aligned for any device type.
    fn allocate(&self, alignment: usize, size: usize) -> Option<DevicePtr> {
        let (pool, stream) = match &self.state {
            PoolState::Ready { pool, stream } => (*pool, stream.handle()),
            PoolState::Unavailable { .. } => return self.allocate_from_fallback(alignment, size),
        };

        let _ctx = match ScopedDeviceActivation::activate(self.runtime.as_ref(), self.config.device_id)
        {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(
                    "{}: cannot activate device {} to allocate {} bytes: {}",
                    self.name,
                    self.config.device_id,
                    size,
                    e
                );
                return None;
            }
        };

        match self.runtime.malloc_from_pool_async(size, pool, stream) {
            Ok(ptr) => {
                self.record_allocation(ptr, size);
                tracing::trace!("{}: allocated {} bytes at {}", self.name, size, ptr);
                Some(ptr)
            }
            Err(e) => {
                self.log_failure(format_args!("failed to allocate {} bytes", size), &e);
                None
            }
        }
    }

    fn deallocate(&self, ptr: DevicePtr) {
        if ptr.is_null() {
            return;
        }

        // Bookkeeping goes first: once the free is queued the pool may hand
        // the same address to a concurrent allocate, whose entry must survive.
        let removed = {
            let mut book = self.book();
            let removed = book.sizes.remove(&ptr);
            if let Some(size) = removed {
                book.stats.record_free(size);
            }
            removed
        };
        debug_assert!(
            removed.is_some(),
            "{}: deallocate of {} which is not a live allocation",
            self.name,
            ptr
        );

        match &self.state {
            PoolState::Ready { stream, .. } => {
                let _ctx =
                    ScopedDeviceActivation::activate(self.runtime.as_ref(), self.config.device_id);
                match self.runtime.free_async(ptr, stream.handle()) {
                    Ok(()) => tracing::trace!("{}: freed {}", self.name, ptr),
                    Err(e) => self.log_failure(format_args!("failed to free {}", ptr), &e),
                }
            }
            PoolState::Unavailable { .. } => {
                if let (FallbackPolicy::WhenPoolUnavailable, Some(fallback)) =
                    (self.config.fallback_policy, &self.fallback)
                {
                    fallback.deallocate(ptr);
                }
            }
        }
    }

    fn tracks_allocation_sizes(&self) -> bool {
        true
    }

    /// # Panics
    ///
    /// Panics if `ptr` is not a live allocation of this allocator.
    fn requested_size(&self, ptr: DevicePtr) -> usize {
        let size = self.book().sizes.get(&ptr).copied();
        match size {
            Some(size) => size,
            None => panic!(
                "{}: size query for {} which is not a live allocation of this allocator",
                self.name, ptr
            ),
        }
    }

    /// The pool does not round sizes, so this equals the requested size.
    fn allocated_size(&self, ptr: DevicePtr) -> usize {
        self.requested_size(ptr)
    }

    fn stats(&self) -> Option<AllocatorStats> {
        Some(self.book().stats)
    }

    fn clear_stats(&self) {
        self.book().stats.reset_window();
    }
}

impl Drop for HipPoolAllocator {
    fn drop(&mut self) {
        let live = match self.book.get_mut() {
            Ok(book) => book.sizes.len(),
            Err(poisoned) => poisoned.into_inner().sizes.len(),
        };
        if live > 0 {
            tracing::warn!("{}: dropped with {} live allocations", self.name, live);
        }

        // The stream belongs to the allocator's device
        if self.is_pool_available() {
            let state = std::mem::replace(
                &mut self.state,
                PoolState::Unavailable {
                    reason: "allocator dropped".to_string(),
                },
            );
            let _ctx =
                ScopedDeviceActivation::activate(self.runtime.as_ref(), self.config.device_id).ok();
            drop(state);
        }

        tracing::debug!("{}: released", self.name);
    }
}
