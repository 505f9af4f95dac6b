//! HIP implementation of [`DeviceRuntime`]

use std::ffi::c_void;
use std::ptr;

use super::device::{describe_failure, gpu_available};
use super::ffi;
use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::runtime::{
    DevicePtr, DeviceRuntime, MemoryInfo, PoolAttribute, PoolHandle, PoolUsageAttribute,
    StreamHandle,
};

/// [`DeviceRuntime`] backed by the ROCm HIP runtime (`amdhip64`)
#[derive(Debug)]
pub struct HipRuntime {
    _private: (),
}

impl HipRuntime {
    /// Initialize HIP and return a runtime handle
    pub fn new() -> HipResult<Self> {
        let result = unsafe { ffi::hipInit(0) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::InitializationFailed(describe_failure(
                "hipInit", result,
            )));
        }
        Ok(Self { _private: () })
    }

    /// Like [`HipRuntime::new`], but reports `DeviceNotFound` when no GPU is present
    pub fn new_checked() -> HipResult<Self> {
        if !gpu_available() {
            return Err(HipError::DeviceNotFound(0));
        }
        Self::new()
    }

    fn set_bool_attribute(pool: PoolHandle, attr: i32, value: bool) -> i32 {
        let mut value: i32 = i32::from(value);
        unsafe {
            ffi::hipMemPoolSetAttribute(
                pool.raw() as *mut c_void,
                attr,
                &mut value as *mut i32 as *mut c_void,
            )
        }
    }
}

fn as_raw(handle: usize) -> *mut c_void {
    handle as *mut c_void
}

impl DeviceRuntime for HipRuntime {
    fn device_count(&self) -> HipResult<i32> {
        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(describe_failure(
                "hipGetDeviceCount",
                result,
            )));
        }
        Ok(count)
    }

    fn current_device(&self) -> HipResult<i32> {
        let mut device: i32 = -1;
        let result = unsafe { ffi::hipGetDevice(&mut device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(describe_failure("hipGetDevice", result)));
        }
        Ok(device)
    }

    fn set_device(&self, device: i32) -> HipResult<()> {
        let result = unsafe { ffi::hipSetDevice(device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(describe_failure(
                &format!("hipSetDevice({})", device),
                result,
            )));
        }
        Ok(())
    }

    fn driver_version(&self) -> HipResult<i32> {
        let mut version: i32 = 0;
        let result = unsafe { ffi::hipDriverGetVersion(&mut version) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(describe_failure(
                "hipDriverGetVersion",
                result,
            )));
        }
        Ok(version)
    }

    fn memory_pools_supported(&self, device: i32) -> HipResult<bool> {
        let mut supported: i32 = 0;
        let result = unsafe {
            ffi::hipDeviceGetAttribute(
                &mut supported,
                ffi::HIP_DEVICE_ATTRIBUTE_MEMORY_POOLS_SUPPORTED,
                device,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(describe_failure(
                "hipDeviceGetAttribute(MemoryPoolsSupported)",
                result,
            )));
        }
        Ok(supported != 0)
    }

    fn create_stream(&self) -> HipResult<StreamHandle> {
        let mut stream: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::StreamError(describe_failure("hipStreamCreate", result)));
        }
        if stream.is_null() {
            return Err(HipError::StreamError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }
        Ok(StreamHandle::from_raw(stream as usize))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamDestroy(as_raw(stream.raw())) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::StreamError(describe_failure("hipStreamDestroy", result)));
        }
        Ok(())
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(as_raw(stream.raw())) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::StreamError(describe_failure(
                "hipStreamSynchronize",
                result,
            )));
        }
        Ok(())
    }

    fn default_mem_pool(&self, device: i32) -> HipResult<PoolHandle> {
        let mut pool: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipDeviceGetDefaultMemPool(&mut pool, device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::PoolError(describe_failure(
                "hipDeviceGetDefaultMemPool",
                result,
            )));
        }
        if pool.is_null() {
            return Err(HipError::PoolError(
                "hipDeviceGetDefaultMemPool returned null pool".to_string(),
            ));
        }
        Ok(PoolHandle::from_raw(pool as usize))
    }

    fn set_pool_attribute(&self, pool: PoolHandle, attribute: PoolAttribute) -> HipResult<()> {
        let (name, result) = match attribute {
            PoolAttribute::ReleaseThreshold(bytes) => {
                let mut value: u64 = bytes;
                let result = unsafe {
                    ffi::hipMemPoolSetAttribute(
                        as_raw(pool.raw()),
                        ffi::HIP_MEM_POOL_ATTR_RELEASE_THRESHOLD,
                        &mut value as *mut u64 as *mut c_void,
                    )
                };
                ("ReleaseThreshold", result)
            }
            PoolAttribute::ReuseFollowEventDependencies(on) => (
                "ReuseFollowEventDependencies",
                Self::set_bool_attribute(pool, ffi::HIP_MEM_POOL_REUSE_FOLLOW_EVENT_DEPENDENCIES, on),
            ),
            PoolAttribute::ReuseAllowOpportunistic(on) => (
                "ReuseAllowOpportunistic",
                Self::set_bool_attribute(pool, ffi::HIP_MEM_POOL_REUSE_ALLOW_OPPORTUNISTIC, on),
            ),
            PoolAttribute::ReuseAllowInternalDependencies(on) => (
                "ReuseAllowInternalDependencies",
                Self::set_bool_attribute(
                    pool,
                    ffi::HIP_MEM_POOL_REUSE_ALLOW_INTERNAL_DEPENDENCIES,
                    on,
                ),
            ),
        };

        if result != ffi::HIP_SUCCESS {
            return Err(HipError::PoolError(describe_failure(
                &format!("hipMemPoolSetAttribute({})", name),
                result,
            )));
        }
        Ok(())
    }

    fn pool_usage_attribute(
        &self,
        pool: PoolHandle,
        attribute: PoolUsageAttribute,
    ) -> HipResult<u64> {
        let attr = match attribute {
            PoolUsageAttribute::ReservedMemCurrent => ffi::HIP_MEM_POOL_ATTR_RESERVED_MEM_CURRENT,
            PoolUsageAttribute::ReservedMemHigh => ffi::HIP_MEM_POOL_ATTR_RESERVED_MEM_HIGH,
            PoolUsageAttribute::UsedMemCurrent => ffi::HIP_MEM_POOL_ATTR_USED_MEM_CURRENT,
            PoolUsageAttribute::UsedMemHigh => ffi::HIP_MEM_POOL_ATTR_USED_MEM_HIGH,
        };
        let mut value: u64 = 0;
        let result = unsafe {
            ffi::hipMemPoolGetAttribute(
                as_raw(pool.raw()),
                attr,
                &mut value as *mut u64 as *mut c_void,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryQueryFailed(describe_failure(
                &format!("hipMemPoolGetAttribute({:?})", attribute),
                result,
            )));
        }
        Ok(value)
    }

    fn malloc(&self, size: usize) -> HipResult<DevicePtr> {
        let mut ptr: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMalloc(&mut ptr, size) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryAllocationFailed(format!(
                "{} for {} bytes",
                describe_failure("hipMalloc", result),
                size
            )));
        }
        Ok(DevicePtr::from_addr(ptr as usize))
    }

    fn free(&self, ptr: DevicePtr) -> HipResult<()> {
        let result = unsafe { ffi::hipFree(as_raw(ptr.addr())) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryFreeFailed(format!(
                "{} for {}",
                describe_failure("hipFree", result),
                ptr
            )));
        }
        Ok(())
    }

    fn malloc_from_pool_async(
        &self,
        size: usize,
        pool: PoolHandle,
        stream: StreamHandle,
    ) -> HipResult<DevicePtr> {
        let mut ptr: *mut c_void = ptr::null_mut();
        let result = unsafe {
            ffi::hipMallocFromPoolAsync(&mut ptr, size, as_raw(pool.raw()), as_raw(stream.raw()))
        };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryAllocationFailed(format!(
                "{} for {} bytes",
                describe_failure("hipMallocFromPoolAsync", result),
                size
            )));
        }
        Ok(DevicePtr::from_addr(ptr as usize))
    }

    fn free_async(&self, ptr: DevicePtr, stream: StreamHandle) -> HipResult<()> {
        let result = unsafe { ffi::hipFreeAsync(as_raw(ptr.addr()), as_raw(stream.raw())) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryFreeFailed(format!(
                "{} for {}",
                describe_failure("hipFreeAsync", result),
                ptr
            )));
        }
        Ok(())
    }

    fn mem_get_info(&self) -> HipResult<MemoryInfo> {
        let mut free: usize = 0;
        let mut total: usize = 0;
        let result = unsafe { ffi::hipMemGetInfo(&mut free, &mut total) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryQueryFailed(describe_failure(
                "hipMemGetInfo",
                result,
            )));
        }
        Ok(MemoryInfo { free, total })
    }
}
