//! Dummy device runtime for unit testing (llama.cpp pattern).
//!
//! Host-only implementation of [`DeviceRuntime`]:
//!
//! - **No GPU allocation**: hands out fake device addresses, never reused
//!   unless [`DummyRuntime::with_address_reuse`] is set
//! - **Call recording**: pool allocations, attribute writes, stream lifetimes
//!   and device switches are recorded for assertions
//! - **Failure injection**: unsupported devices, stream/pool query failures,
//!   out-of-memory and failing frees can be switched on per test
//!
//! It is also what the probe binary falls back to on machines without ROCm.
//!
//! ```rust
//! use std::sync::Arc;
//! use rocmforge_pool::backend::DummyRuntime;
//!
//! let runtime = Arc::new(DummyRuntime::new(2).with_unsupported_device(1));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::runtime::{
    DevicePtr, DeviceRuntime, MemoryInfo, PoolAttribute, PoolHandle, PoolUsageAttribute,
    StreamHandle,
};

/// Fake device addresses start here (llama.cpp uses 16 as its fake base)
const FAKE_ADDRESS_BASE: usize = 0x7f00_0000_0000;
/// Granularity of fake addresses
const FAKE_ADDRESS_ALIGNMENT: usize = 256;
const FAKE_STREAM_BASE: usize = 0x5000;
const FAKE_POOL_BASE: usize = 0x9000;
const DEFAULT_DRIVER_VERSION: i32 = 60_200_000;
const DEFAULT_TOTAL_MEMORY: usize = 16 * 1024 * 1024 * 1024;

/// Recorded runtime call, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyEvent {
    SetDevice(i32),
    Malloc { device: i32, size: usize },
    Free { device: i32 },
    CreateStream { device: i32 },
    DestroyStream { device: i32 },
    SetPoolAttribute { device: i32, attribute: PoolAttribute },
    PoolAlloc { device: i32, size: usize },
    PoolFree { device: i32 },
}

/// Attribute values of a fake device pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyPoolAttributes {
    pub release_threshold: u64,
    pub reuse_follow_event_dependencies: bool,
    pub reuse_allow_opportunistic: bool,
    pub reuse_allow_internal_dependencies: bool,
}

impl Default for DummyPoolAttributes {
    fn default() -> Self {
        // Driver defaults: threshold 0, every reuse policy enabled
        Self {
            release_threshold: 0,
            reuse_follow_event_dependencies: true,
            reuse_allow_opportunistic: true,
            reuse_allow_internal_dependencies: true,
        }
    }
}

#[derive(Debug, Default)]
struct DummyPool {
    attributes: DummyPoolAttributes,
    used_current: u64,
    used_high: u64,
    reserved_current: u64,
    reserved_high: u64,
}

#[derive(Debug)]
struct DummyState {
    device_count: i32,
    driver_version: i32,
    total_memory: usize,
    unsupported: HashSet<i32>,
    fail_stream_creation: bool,
    fail_pool_query: bool,
    fail_release_threshold: bool,
    fail_free: bool,
    null_for_zero_size: bool,
    reuse_addresses: bool,
    freed_addresses: Vec<DevicePtr>,
    pool_capacity: Option<usize>,
    failing_pool_allocs: usize,
    thread_devices: HashMap<ThreadId, i32>,
    set_device_calls: usize,
    next_address: usize,
    next_stream: usize,
    streams: HashMap<StreamHandle, i32>,
    pools: HashMap<i32, DummyPool>,
    pool_allocations: HashMap<DevicePtr, (i32, usize)>,
    pool_alloc_sizes: Vec<usize>,
    sync_allocations: HashMap<DevicePtr, (i32, usize)>,
    events: Vec<DummyEvent>,
}

impl DummyState {
    fn current_device(&self) -> i32 {
        self.thread_devices
            .get(&thread::current().id())
            .copied()
            .unwrap_or(0)
    }

    fn check_device(&self, device: i32) -> HipResult<()> {
        if device < 0 || device >= self.device_count {
            return Err(HipError::DeviceNotFound(device));
        }
        Ok(())
    }

    fn next_fake_address(&mut self, size: usize) -> DevicePtr {
        let ptr = DevicePtr::from_addr(self.next_address);
        let step = size.max(1).div_ceil(FAKE_ADDRESS_ALIGNMENT) * FAKE_ADDRESS_ALIGNMENT;
        self.next_address += step;
        ptr
    }

    fn pool_device(&self, pool: PoolHandle) -> HipResult<i32> {
        let device = pool.raw().wrapping_sub(FAKE_POOL_BASE) as i32;
        if pool.raw() < FAKE_POOL_BASE || !self.pools.contains_key(&device) {
            return Err(HipError::PoolError(format!(
                "unknown memory pool {:#x}",
                pool.raw()
            )));
        }
        Ok(device)
    }

    fn device_bytes_in_use(&self, device: i32) -> usize {
        let pooled = self
            .pools
            .get(&device)
            .map(|pool| pool.reserved_current as usize)
            .unwrap_or(0);
        let sync: usize = self
            .sync_allocations
            .values()
            .filter(|(d, _)| *d == device)
            .map(|(_, size)| size)
            .sum();
        pooled + sync
    }
}

/// Host-only [`DeviceRuntime`] with call recording and failure injection
#[derive(Debug)]
pub struct DummyRuntime {
    state: Mutex<DummyState>,
}

impl DummyRuntime {
    /// Create a runtime exposing `device_count` devices, all supporting memory pools
    pub fn new(device_count: i32) -> Self {
        Self {
            state: Mutex::new(DummyState {
                device_count,
                driver_version: DEFAULT_DRIVER_VERSION,
                total_memory: DEFAULT_TOTAL_MEMORY,
                unsupported: HashSet::new(),
                fail_stream_creation: false,
                fail_pool_query: false,
                fail_release_threshold: false,
                fail_free: false,
                null_for_zero_size: false,
                reuse_addresses: false,
                freed_addresses: Vec::new(),
                pool_capacity: None,
                failing_pool_allocs: 0,
                thread_devices: HashMap::new(),
                set_device_calls: 0,
                next_address: FAKE_ADDRESS_BASE,
                next_stream: FAKE_STREAM_BASE,
                streams: HashMap::new(),
                pools: HashMap::new(),
                pool_allocations: HashMap::new(),
                pool_alloc_sizes: Vec::new(),
                sync_allocations: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DummyState> {
        // A panicking test thread must not take the other tests down with it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn configure(self, f: impl FnOnce(&mut DummyState)) -> Self {
        f(&mut self.state());
        self
    }

    /// Report `device` as lacking memory pool support
    pub fn with_unsupported_device(self, device: i32) -> Self {
        self.configure(|s| {
            s.unsupported.insert(device);
        })
    }

    pub fn with_driver_version(self, version: i32) -> Self {
        self.configure(|s| s.driver_version = version)
    }

    pub fn with_total_memory(self, bytes: usize) -> Self {
        self.configure(|s| s.total_memory = bytes)
    }

    /// Fail pool allocations that would push a pool's live bytes above `bytes`
    pub fn with_pool_capacity(self, bytes: usize) -> Self {
        self.configure(|s| s.pool_capacity = Some(bytes))
    }

    /// Return the null address for successful zero-byte pool allocations
    pub fn with_null_zero_size_allocations(self) -> Self {
        self.configure(|s| s.null_for_zero_size = true)
    }

    /// Hand the most recently freed pool address to the next pool allocation,
    /// the way a real pool recycles its blocks
    pub fn with_address_reuse(self) -> Self {
        self.configure(|s| s.reuse_addresses = true)
    }

    pub fn fail_stream_creation(self) -> Self {
        self.configure(|s| s.fail_stream_creation = true)
    }

    pub fn fail_pool_query(self) -> Self {
        self.configure(|s| s.fail_pool_query = true)
    }

    pub fn fail_release_threshold(self) -> Self {
        self.configure(|s| s.fail_release_threshold = true)
    }

    /// Make the next `count` pool allocations fail with out-of-memory
    pub fn fail_next_pool_allocs(&self, count: usize) {
        self.state().failing_pool_allocs = count;
    }

    /// Make every subsequent `free_async` report an error
    pub fn set_fail_free(&self, fail: bool) {
        self.state().fail_free = fail;
    }

    /// Number of streams created and not yet destroyed
    pub fn live_streams(&self) -> usize {
        self.state().streams.len()
    }

    /// Number of `set_device` calls that reached the runtime
    pub fn set_device_calls(&self) -> usize {
        self.state().set_device_calls
    }

    /// Sizes of every successful pool allocation, in issue order
    pub fn pool_alloc_sizes(&self) -> Vec<usize> {
        self.state().pool_alloc_sizes.clone()
    }

    /// Live pool allocations across all devices
    pub fn live_pool_allocations(&self) -> usize {
        self.state().pool_allocations.len()
    }

    /// Bytes of live pool allocations on `device`
    pub fn pool_live_bytes(&self, device: i32) -> usize {
        self.state()
            .pool_allocations
            .values()
            .filter(|(d, _)| *d == device)
            .map(|(_, size)| size)
            .sum()
    }

    /// Attributes of `device`'s default pool, if it was ever fetched
    pub fn pool_attributes(&self, device: i32) -> Option<DummyPoolAttributes> {
        self.state().pools.get(&device).map(|pool| pool.attributes)
    }

    /// Synchronous allocations made on each device, as (device, size)
    pub fn sync_mallocs(&self) -> Vec<(i32, usize)> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                DummyEvent::Malloc { device, size } => Some((*device, *size)),
                _ => None,
            })
            .collect()
    }

    /// Every recorded call, in issue order
    pub fn events(&self) -> Vec<DummyEvent> {
        self.state().events.clone()
    }
}

impl DeviceRuntime for DummyRuntime {
    fn device_count(&self) -> HipResult<i32> {
        Ok(self.state().device_count)
    }

    fn current_device(&self) -> HipResult<i32> {
        Ok(self.state().current_device())
    }

    fn set_device(&self, device: i32) -> HipResult<()> {
        let mut state = self.state();
        state.check_device(device)?;
        state.set_device_calls += 1;
        state.thread_devices.insert(thread::current().id(), device);
        state.events.push(DummyEvent::SetDevice(device));
        Ok(())
    }

    fn driver_version(&self) -> HipResult<i32> {
        Ok(self.state().driver_version)
    }

    fn memory_pools_supported(&self, device: i32) -> HipResult<bool> {
        let state = self.state();
        state.check_device(device)?;
        Ok(!state.unsupported.contains(&device))
    }

    fn create_stream(&self) -> HipResult<StreamHandle> {
        let mut state = self.state();
        if state.fail_stream_creation {
            return Err(HipError::StreamError(
                "hipStreamCreate failed: out of resources".to_string(),
            ));
        }
        let device = state.current_device();
        let handle = StreamHandle::from_raw(state.next_stream);
        state.next_stream += 1;
        state.streams.insert(handle, device);
        state.events.push(DummyEvent::CreateStream { device });
        Ok(handle)
    }

    fn destroy_stream(&self, stream: StreamHandle) -> HipResult<()> {
        let mut state = self.state();
        match state.streams.remove(&stream) {
            Some(device) => {
                state.events.push(DummyEvent::DestroyStream { device });
                Ok(())
            }
            None => Err(HipError::StreamError(format!(
                "hipStreamDestroy: invalid stream {:#x}",
                stream.raw()
            ))),
        }
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> HipResult<()> {
        if self.state().streams.contains_key(&stream) {
            Ok(())
        } else {
            Err(HipError::StreamError(format!(
                "hipStreamSynchronize: invalid stream {:#x}",
                stream.raw()
            )))
        }
    }

    fn default_mem_pool(&self, device: i32) -> HipResult<PoolHandle> {
        let mut state = self.state();
        state.check_device(device)?;
        if state.fail_pool_query {
            return Err(HipError::PoolError(format!(
                "hipDeviceGetDefaultMemPool failed for device {}",
                device
            )));
        }
        state.pools.entry(device).or_default();
        Ok(PoolHandle::from_raw(FAKE_POOL_BASE + device as usize))
    }

    fn set_pool_attribute(&self, pool: PoolHandle, attribute: PoolAttribute) -> HipResult<()> {
        let mut state = self.state();
        let device = state.pool_device(pool)?;
        if state.fail_release_threshold && matches!(attribute, PoolAttribute::ReleaseThreshold(_)) {
            return Err(HipError::PoolError(
                "hipMemPoolSetAttribute(ReleaseThreshold) failed".to_string(),
            ));
        }

        let attrs = &mut state
            .pools
            .get_mut(&device)
            .ok_or_else(|| HipError::PoolError(format!("no pool for device {}", device)))?
            .attributes;
        match attribute {
            PoolAttribute::ReleaseThreshold(bytes) => attrs.release_threshold = bytes,
            PoolAttribute::ReuseFollowEventDependencies(on) => {
                attrs.reuse_follow_event_dependencies = on
            }
            PoolAttribute::ReuseAllowOpportunistic(on) => attrs.reuse_allow_opportunistic = on,
            PoolAttribute::ReuseAllowInternalDependencies(on) => {
                attrs.reuse_allow_internal_dependencies = on
            }
        }
        state
            .events
            .push(DummyEvent::SetPoolAttribute { device, attribute });
        Ok(())
    }

    fn pool_usage_attribute(
        &self,
        pool: PoolHandle,
        attribute: PoolUsageAttribute,
    ) -> HipResult<u64> {
        let state = self.state();
        let device = state.pool_device(pool)?;
        let pool = state
            .pools
            .get(&device)
            .ok_or_else(|| HipError::PoolError(format!("no pool for device {}", device)))?;
        Ok(match attribute {
            PoolUsageAttribute::ReservedMemCurrent => pool.reserved_current,
            PoolUsageAttribute::ReservedMemHigh => pool.reserved_high,
            PoolUsageAttribute::UsedMemCurrent => pool.used_current,
            PoolUsageAttribute::UsedMemHigh => pool.used_high,
        })
    }

    fn malloc(&self, size: usize) -> HipResult<DevicePtr> {
        let mut state = self.state();
        let device = state.current_device();
        let ptr = state.next_fake_address(size);
        state.sync_allocations.insert(ptr, (device, size));
        state.events.push(DummyEvent::Malloc { device, size });
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> HipResult<()> {
        let mut state = self.state();
        match state.sync_allocations.remove(&ptr) {
            Some((device, _)) => {
                state.events.push(DummyEvent::Free { device });
                Ok(())
            }
            None => Err(HipError::MemoryFreeFailed(format!(
                "hipFree: {} was not allocated with hipMalloc",
                ptr
            ))),
        }
    }

    fn malloc_from_pool_async(
        &self,
        size: usize,
        pool: PoolHandle,
        stream: StreamHandle,
    ) -> HipResult<DevicePtr> {
        let mut state = self.state();
        let device = state.pool_device(pool)?;
        if !state.streams.contains_key(&stream) {
            return Err(HipError::StreamError(format!(
                "hipMallocFromPoolAsync: invalid stream {:#x}",
                stream.raw()
            )));
        }

        if state.failing_pool_allocs > 0 {
            state.failing_pool_allocs -= 1;
            return Err(HipError::MemoryAllocationFailed(format!(
                "hipMallocFromPoolAsync: out of memory for {} bytes",
                size
            )));
        }

        let live: usize = state
            .pool_allocations
            .values()
            .filter(|(d, _)| *d == device)
            .map(|(_, s)| s)
            .sum();
        if let Some(capacity) = state.pool_capacity {
            if live + size > capacity {
                return Err(HipError::MemoryAllocationFailed(format!(
                    "hipMallocFromPoolAsync: out of memory for {} bytes ({} of {} in use)",
                    size, live, capacity
                )));
            }
        }

        let ptr = if size == 0 && state.null_for_zero_size {
            DevicePtr::null()
        } else {
            let recycled = if state.reuse_addresses {
                state.freed_addresses.pop()
            } else {
                None
            };
            let ptr = match recycled {
                Some(ptr) => ptr,
                None => state.next_fake_address(size),
            };
            state.pool_allocations.insert(ptr, (device, size));
            ptr
        };

        if let Some(pool) = state.pools.get_mut(&device) {
            pool.used_current += size as u64;
            pool.used_high = pool.used_high.max(pool.used_current);
            pool.reserved_current = pool.reserved_current.max(pool.used_current);
            pool.reserved_high = pool.reserved_high.max(pool.reserved_current);
        }
        state.pool_alloc_sizes.push(size);
        state.events.push(DummyEvent::PoolAlloc { device, size });
        Ok(ptr)
    }

    fn free_async(&self, ptr: DevicePtr, stream: StreamHandle) -> HipResult<()> {
        let mut state = self.state();
        if !state.streams.contains_key(&stream) {
            return Err(HipError::StreamError(format!(
                "hipFreeAsync: invalid stream {:#x}",
                stream.raw()
            )));
        }
        if state.fail_free {
            return Err(HipError::MemoryFreeFailed(format!(
                "hipFreeAsync failed for {}",
                ptr
            )));
        }
        if ptr.is_null() {
            return Ok(());
        }

        let (device, size) = state.pool_allocations.remove(&ptr).ok_or_else(|| {
            HipError::MemoryFreeFailed(format!("hipFreeAsync: {} is not a pool allocation", ptr))
        })?;
        if let Some(pool) = state.pools.get_mut(&device) {
            pool.used_current = pool.used_current.saturating_sub(size as u64);
            // Memory above the release threshold goes back to the device
            let keep = pool.attributes.release_threshold.max(pool.used_current);
            pool.reserved_current = pool.reserved_current.min(keep);
        }
        if state.reuse_addresses {
            state.freed_addresses.push(ptr);
        }
        state.events.push(DummyEvent::PoolFree { device });
        Ok(())
    }

    fn mem_get_info(&self) -> HipResult<MemoryInfo> {
        let state = self.state();
        let device = state.current_device();
        let used = state.device_bytes_in_use(device);
        Ok(MemoryInfo {
            free: state.total_memory.saturating_sub(used),
            total: state.total_memory,
        })
    }
}
