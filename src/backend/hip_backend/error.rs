//! HIP error types

use thiserror::Error;

/// Errors reported by device runtime calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HipError {
    #[error("HIP initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Device {0} not found")]
    DeviceNotFound(i32),
    #[error("Device error: {0}")]
    DeviceError(String),
    #[error("Stream-ordered memory pools are not supported on device {0}")]
    MemoryPoolsUnsupported(i32),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Memory pool error: {0}")]
    PoolError(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory free failed: {0}")]
    MemoryFreeFailed(String),
    #[error("Memory query failed: {0}")]
    MemoryQueryFailed(String),
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

impl HipError {
    /// Check if this error is recoverable (temporary condition)
    ///
    /// Allocation and free failures can succeed later once other consumers
    /// release memory. Missing devices and unsupported pools will not change
    /// for the lifetime of the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HipError::DeviceError(_)
                | HipError::MemoryAllocationFailed(_)
                | HipError::MemoryFreeFailed(_)
                | HipError::MemoryQueryFailed(_)
        )
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}
