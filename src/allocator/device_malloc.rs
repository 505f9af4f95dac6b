//! Synchronous `hipMalloc`/`hipFree` allocator
//!
//! Plain device allocations without a pool or stream ordering. Mainly useful
//! as the fallback of a pool allocator on devices without pool support.

use std::sync::Arc;

use crate::allocator::traits::DeviceAllocator;
use crate::backend::device_context::ScopedDeviceActivation;
use crate::backend::runtime::{DevicePtr, DeviceRuntime};

/// Allocator issuing one synchronous device allocation per request
#[derive(Debug)]
pub struct DeviceMallocAllocator {
    runtime: Arc<dyn DeviceRuntime>,
    device_id: i32,
    name: String,
}

impl DeviceMallocAllocator {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, device_id: i32) -> Self {
        Self {
            runtime,
            device_id,
            name: format!("hip_malloc_{}", device_id),
        }
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }
}

impl DeviceAllocator for DeviceMallocAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, _alignment: usize, size: usize) -> Option<DevicePtr> {
        let _ctx = match ScopedDeviceActivation::activate(self.runtime.as_ref(), self.device_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!("{}: cannot activate device: {}", self.name, e);
                return None;
            }
        };

        match self.runtime.malloc(size) {
            Ok(ptr) => {
                tracing::trace!("{}: allocated {} bytes at {}", self.name, size, ptr);
                Some(ptr)
            }
            Err(e) => {
                tracing::error!("{}: failed to allocate {} bytes: {}", self.name, size, e);
                None
            }
        }
    }

    fn deallocate(&self, ptr: DevicePtr) {
        let _ctx = ScopedDeviceActivation::activate(self.runtime.as_ref(), self.device_id);
        if let Err(e) = self.runtime.free(ptr) {
            tracing::error!("{}: failed to free {}: {}", self.name, ptr, e);
        }
    }
}
