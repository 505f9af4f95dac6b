//! ROCm/HIP runtime bindings
//!
//! `error` is always available since every [`DeviceRuntime`] reports
//! [`HipError`]. The FFI layer and [`HipRuntime`] need `amdhip64` and are
//! compiled with the `rocm` feature only.
//!
//! [`DeviceRuntime`]: crate::backend::runtime::DeviceRuntime

pub mod error;

#[cfg(feature = "rocm")]
pub mod device;
#[cfg(feature = "rocm")]
mod ffi;
#[cfg(feature = "rocm")]
mod runtime;

pub use error::{HipError, HipResult};

#[cfg(feature = "rocm")]
pub use device::{get_error_string, gpu_available};
#[cfg(feature = "rocm")]
pub use runtime::HipRuntime;
