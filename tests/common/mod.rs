//! Common test utilities for pool allocator tests
//!
//! - Dummy-runtime helpers for the host-only tests
//! - A shared GPU fixture (feature `rocm`) that checks GPU availability
//!   before running and detects device memory leaks afterwards
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{serial, GPU_FIXTURE};
//!
//! #[test]
//! #[serial]
//! fn my_gpu_test() {
//!     let Some(fixture) = GPU_FIXTURE.as_ref() else {
//!         eprintln!("GPU not available - test skipped");
//!         return;
//!     };
//!     // ... test code ...
//!     fixture.assert_no_leak(5);
//! }
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use rocmforge_pool::{
    DummyRuntime, HipPoolAllocator, LoggingConfig, PoolAllocatorConfig, PrimaryContextWorkaround,
};
pub use serial_test::serial;

/// Install a test subscriber once per test binary; honours `RUST_LOG`
pub fn init_test_logging() {
    let _ = rocmforge_pool::init_with_config(
        &LoggingConfig::new().with_level(rocmforge_pool::logging::LogLevel::Warn),
    );
}

/// Dummy runtime with `devices` pool-capable devices
pub fn dummy_runtime(devices: i32) -> Arc<DummyRuntime> {
    init_test_logging();
    Arc::new(DummyRuntime::new(devices))
}

/// Pool allocator without a fallback on `runtime`
pub fn pool_allocator(runtime: &Arc<DummyRuntime>, config: PoolAllocatorConfig) -> HipPoolAllocator {
    HipPoolAllocator::new(runtime.clone(), None, config)
}

/// Configuration for `device` that never touches device 0 first
pub fn isolated_config(device: i32, pool_size: usize) -> PoolAllocatorConfig {
    PoolAllocatorConfig::new(device, pool_size)
        .with_primary_context_workaround(PrimaryContextWorkaround::Never)
}

#[cfg(feature = "rocm")]
pub use gpu::{GpuTestFixture, GPU_FIXTURE};

#[cfg(feature = "rocm")]
mod gpu {
    use std::sync::Arc;

    use once_cell::sync::Lazy;
    use rocmforge_pool::{gpu_available, DeviceRuntime, HipRuntime};

    /// Global GPU test fixture
    ///
    /// Initialized once for all tests in a binary. `None` when no GPU is
    /// present, in which case GPU tests skip.
    pub static GPU_FIXTURE: Lazy<Option<GpuTestFixture>> = Lazy::new(|| {
        if !gpu_available() {
            eprintln!("WARNING: GPU not available - skipping GPU tests");
            eprintln!("To enable GPU tests, ensure:");
            eprintln!("  1. AMD GPU is present");
            eprintln!("  2. ROCm is installed (check with rocm-smi)");
            eprintln!("  3. amdhip64 library is in LD_LIBRARY_PATH");
            return None;
        }

        match GpuTestFixture::new() {
            Ok(fixture) => {
                eprintln!(
                    "GPU test fixture: {} device(s), {} MB free of {} MB",
                    fixture.device_count,
                    fixture.initial_free / 1024 / 1024,
                    fixture.total / 1024 / 1024
                );
                Some(fixture)
            }
            Err(e) => {
                eprintln!("ERROR: failed to initialize GPU test fixture: {}", e);
                None
            }
        }
    });

    pub struct GpuTestFixture {
        runtime: Arc<HipRuntime>,
        device_count: i32,
        initial_free: usize,
        total: usize,
    }

    impl GpuTestFixture {
        pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
            let runtime = Arc::new(HipRuntime::new_checked()?);
            runtime.set_device(0)?;
            let device_count = runtime.device_count()?;
            let info = runtime.mem_get_info()?;
            Ok(Self {
                runtime,
                device_count,
                initial_free: info.free,
                total: info.total,
            })
        }

        pub fn runtime(&self) -> Arc<dyn DeviceRuntime> {
            self.runtime.clone()
        }

        pub fn device_count(&self) -> i32 {
            self.device_count
        }

        /// 10% of the free memory seen at startup
        pub fn safe_pool_size(&self) -> usize {
            self.initial_free / 10
        }

        /// Panics if device 0 lost more than `tolerance_percent` of its total
        /// memory since the fixture was created
        pub fn assert_no_leak(&self, tolerance_percent: usize) {
            let info = self
                .runtime
                .mem_get_info()
                .expect("Failed to query GPU memory");
            let leaked = self.initial_free.saturating_sub(info.free);
            let tolerance = self.total / 100 * tolerance_percent;
            assert!(
                leaked <= tolerance,
                "GPU memory leak detected: initial free {} B, current free {} B, tolerance {} B",
                self.initial_free,
                info.free,
                tolerance
            );
        }
    }
}
