//! HIP device queries

use std::ffi::CStr;

use super::ffi;

/// Get HIP error string from error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Format a failed HIP call as `"<call> failed: <message> (code N)"`
pub(super) fn describe_failure(call: &str, code: i32) -> String {
    format!("{} failed: {} (code {})", call, get_error_string(code), code)
}

/// Check whether a usable HIP device is present
///
/// Cheap enough to call from test fixtures: initializes HIP once and caches
/// the answer for the process lifetime.
pub fn gpu_available() -> bool {
    use once_cell::sync::Lazy;

    static AVAILABLE: Lazy<bool> = Lazy::new(|| {
        let init_result = unsafe { ffi::hipInit(0) };
        if init_result != ffi::HIP_SUCCESS {
            tracing::debug!(
                "HIP not available: hipInit failed with code {}",
                init_result
            );
            return false;
        }

        let mut count: i32 = 0;
        let count_result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if count_result != ffi::HIP_SUCCESS {
            tracing::debug!(
                "HIP not available: hipGetDeviceCount failed with code {}",
                count_result
            );
            return false;
        }

        tracing::debug!("HIP available with {} device(s)", count);
        count > 0
    });

    *AVAILABLE
}
