//! HIP FFI bindings
//!
//! Only the runtime entry points used by the pool allocator are declared.
//! Signatures follow `hip_runtime_api.h`; opaque handles (`hipStream_t`,
//! `hipMemPool_t`) are passed as `*mut c_void`.

use std::ffi::c_void;

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDevice(deviceId: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipDriverGetVersion(driverVersion: *mut i32) -> i32;
    pub fn hipDeviceGetAttribute(value: *mut i32, attr: i32, deviceId: i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipDeviceGetDefaultMemPool(mem_pool: *mut *mut c_void, device: i32) -> i32;
    pub fn hipMemPoolSetAttribute(mem_pool: *mut c_void, attr: i32, value: *mut c_void) -> i32;
    pub fn hipMemPoolGetAttribute(mem_pool: *mut c_void, attr: i32, value: *mut c_void) -> i32;
    pub fn hipMallocFromPoolAsync(
        dev_ptr: *mut *mut c_void,
        size: usize,
        mem_pool: *mut c_void,
        stream: *mut c_void,
    ) -> i32;
    pub fn hipFreeAsync(dev_ptr: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// `hipDeviceAttributeMemoryPoolsSupported`
pub const HIP_DEVICE_ATTRIBUTE_MEMORY_POOLS_SUPPORTED: i32 = 88;

// hipMemPoolAttr values
pub const HIP_MEM_POOL_REUSE_FOLLOW_EVENT_DEPENDENCIES: i32 = 0x1;
pub const HIP_MEM_POOL_REUSE_ALLOW_OPPORTUNISTIC: i32 = 0x2;
pub const HIP_MEM_POOL_REUSE_ALLOW_INTERNAL_DEPENDENCIES: i32 = 0x3;
pub const HIP_MEM_POOL_ATTR_RELEASE_THRESHOLD: i32 = 0x4;
pub const HIP_MEM_POOL_ATTR_RESERVED_MEM_CURRENT: i32 = 0x5;
pub const HIP_MEM_POOL_ATTR_RESERVED_MEM_HIGH: i32 = 0x6;
pub const HIP_MEM_POOL_ATTR_USED_MEM_CURRENT: i32 = 0x7;
pub const HIP_MEM_POOL_ATTR_USED_MEM_HIGH: i32 = 0x8;
