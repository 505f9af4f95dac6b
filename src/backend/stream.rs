//! Owned stream wrapper

use std::sync::Arc;

use crate::backend::hip_backend::error::HipResult;
use crate::backend::runtime::{DeviceRuntime, StreamHandle};

// NOTE: HipStream does NOT implement Clone because cloning the handle
// would destroy the stream twice when both instances are dropped.

/// Stream created on the current device and destroyed on drop
#[derive(Debug)]
pub struct HipStream {
    runtime: Arc<dyn DeviceRuntime>,
    handle: StreamHandle,
}

impl HipStream {
    /// Create a new stream on the device current for the calling thread
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> HipResult<Self> {
        tracing::debug!("HipStream::new: Creating stream...");
        let handle = runtime.create_stream()?;
        tracing::debug!("HipStream::new: stream {:#x} created", handle.raw());
        Ok(HipStream { runtime, handle })
    }

    /// Block until every operation queued on this stream has completed
    pub fn synchronize(&self) -> HipResult<()> {
        self.runtime.synchronize_stream(self.handle)
    }

    /// Raw handle for runtime calls
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_stream(self.handle) {
            tracing::warn!(
                "HipStream::drop: failed to destroy stream {:#x}: {}",
                self.handle.raw(),
                e
            );
        }
    }
}
