//! Scoped device activation
//!
//! **CRITICAL:** HIP device context is PER-THREAD, not global.
//! - `hipSetDevice()` only affects the calling thread
//! - pool and stream calls act on whatever device is current for that thread
//!
//! [`ScopedDeviceActivation`] makes a device current for the lifetime of the
//! guard and restores the previously current device when dropped, on every
//! exit path including early returns.

use crate::backend::hip_backend::error::HipResult;
use crate::backend::runtime::DeviceRuntime;

/// RAII guard that keeps a device current for the calling thread
#[derive(Debug)]
#[must_use = "the device is only active while the guard is alive"]
pub struct ScopedDeviceActivation<'a> {
    runtime: &'a dyn DeviceRuntime,
    device: i32,
    previous: Option<i32>,
}

impl<'a> ScopedDeviceActivation<'a> {
    /// Activate `device` on the calling thread.
    ///
    /// No driver call is made when `device` is already current.
    pub fn activate(runtime: &'a dyn DeviceRuntime, device: i32) -> HipResult<Self> {
        let current = runtime.current_device()?;
        let previous = if current != device {
            tracing::trace!(
                "ScopedDeviceActivation: switching thread device {} -> {}",
                current,
                device
            );
            runtime.set_device(device)?;
            Some(current)
        } else {
            None
        };

        Ok(Self {
            runtime,
            device,
            previous,
        })
    }

    /// Device held current by this guard
    pub fn device(&self) -> i32 {
        self.device
    }
}

impl Drop for ScopedDeviceActivation<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            if let Err(e) = self.runtime.set_device(previous) {
                tracing::warn!(
                    "ScopedDeviceActivation: failed to restore device {} after using device {}: {}",
                    previous,
                    self.device,
                    e
                );
            }
        }
    }
}
