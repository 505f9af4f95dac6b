//! Inspect a device's stream-ordered memory pool
//!
//! Builds a pool allocator from `ROCFORGE_*` environment variables plus the
//! command line, runs a few allocate/free cycles and prints the allocator
//! statistics and the driver's pool counters as JSON.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rocmforge_pool::config::parse_byte_size;
use rocmforge_pool::{
    init_logging_default, AllocatorStats, DeviceAllocator, DeviceMallocAllocator, DeviceRuntime,
    DummyRuntime, FallbackPolicy, HipPoolAllocator, PoolAllocatorConfig, PoolUsage,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "rocmforge-pool-probe", version)]
#[command(about = "Exercise a HIP stream-ordered memory pool and report its statistics", long_about = None)]
struct Cli {
    /// Device id (overrides ROCFORGE_POOL_DEVICE)
    #[arg(long)]
    device: Option<i32>,
    /// Pool release threshold, e.g. 512M (overrides ROCFORGE_POOL_SIZE)
    #[arg(long, value_parser = parse_byte_size)]
    pool_size: Option<usize>,
    /// Pre-fill the pool at construction
    #[arg(long)]
    reserve: bool,
    /// Disable non-deterministic reuse in the pool
    #[arg(long)]
    deterministic: bool,
    /// Serve requests from hipMalloc when the pool cannot be set up
    #[arg(long)]
    fallback: bool,
    /// Size of each probe allocation
    #[arg(long, default_value = "1M", value_parser = parse_byte_size)]
    alloc_size: usize,
    /// Number of allocations held live at once
    #[arg(long, default_value_t = 4)]
    count: usize,
    /// Use the host-only dummy runtime instead of HIP
    #[arg(long)]
    dummy: bool,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    allocator: String,
    pool_available: bool,
    unavailable_reason: Option<String>,
    config: PoolAllocatorConfig,
    allocations: usize,
    failed_allocations: usize,
    stats_after_alloc: Option<AllocatorStats>,
    stats_after_free: Option<AllocatorStats>,
    pool_usage: Option<PoolUsage>,
}

fn build_config(cli: &Cli) -> Result<PoolAllocatorConfig> {
    let mut config =
        PoolAllocatorConfig::from_env().context("reading ROCFORGE_POOL_* environment")?;
    if let Some(device) = cli.device {
        config.device_id = device;
    }
    if let Some(size) = cli.pool_size {
        config.pool_size = size;
    }
    config.reserve_memory |= cli.reserve;
    config.deterministic |= cli.deterministic;
    if cli.fallback {
        config.fallback_policy = FallbackPolicy::WhenPoolUnavailable;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "rocm")]
fn hip_runtime() -> Result<Arc<dyn DeviceRuntime>> {
    let runtime = rocmforge_pool::HipRuntime::new_checked().context("initializing HIP")?;
    Ok(Arc::new(runtime))
}

#[cfg(not(feature = "rocm"))]
fn hip_runtime() -> Result<Arc<dyn DeviceRuntime>> {
    bail!("built without the `rocm` feature; rerun with --dummy")
}

fn main() -> Result<()> {
    init_logging_default();
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let runtime: Arc<dyn DeviceRuntime> = if cli.dummy {
        Arc::new(DummyRuntime::new(config.device_id.max(0) + 1))
    } else {
        hip_runtime()?
    };
    tracing::info!(
        "probing device {} of {} with config {:?}",
        config.device_id,
        runtime.device_count()?,
        config
    );

    let fallback: Box<dyn DeviceAllocator> =
        Box::new(DeviceMallocAllocator::new(runtime.clone(), config.device_id));
    let allocator = HipPoolAllocator::new(runtime, Some(fallback), config.clone());

    let mut live = Vec::with_capacity(cli.count);
    let mut failed = 0;
    for _ in 0..cli.count {
        match allocator.allocate(0, cli.alloc_size) {
            Some(ptr) => live.push(ptr),
            None => failed += 1,
        }
    }
    let stats_after_alloc = allocator.stats();
    let allocations = live.len();

    for ptr in live {
        allocator.deallocate(ptr);
    }
    allocator
        .synchronize()
        .context("waiting for queued pool operations")?;

    let report = ProbeReport {
        allocator: allocator.name().to_string(),
        pool_available: allocator.is_pool_available(),
        unavailable_reason: allocator.unavailable_reason().map(str::to_string),
        config,
        allocations,
        failed_allocations: failed,
        stats_after_alloc,
        stats_after_free: allocator.stats(),
        pool_usage: allocator.pool_usage(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if allocations == 0 && cli.count > 0 {
        bail!("no allocation succeeded on {}", allocator.name());
    }
    Ok(())
}
