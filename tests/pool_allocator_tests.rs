//! Pool allocator behaviour against the dummy runtime
//!
//! Covers statistics accounting, size tracking, pre-warming, deterministic
//! mode, the device 0 context workaround, degraded construction, fallback
//! routing, driver failures and address recycling.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use rocmforge_pool::backend::DummyEvent;
use rocmforge_pool::{
    AllocatorStats, DeviceAllocator, DeviceMallocAllocator, DevicePtr, DeviceRuntime,
    DummyRuntime, FallbackPolicy, HipPoolAllocator, PoolAllocatorConfig,
    PrimaryContextWorkaround,
};

use common::{dummy_runtime, init_test_logging, isolated_config, pool_allocator};

const MIB: usize = 1 << 20;

#[test]
fn test_stats_follow_allocate_deallocate_and_clear() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, 64 * MIB));

    let a = allocator.allocate(256, 1024).expect("first allocation");
    let b = allocator.allocate(256, 4096).expect("second allocation");

    let stats = allocator.stats().unwrap();
    assert_eq!(stats.num_allocs, 2);
    assert_eq!(stats.bytes_in_use, 5120);
    assert_eq!(stats.peak_bytes_in_use, 5120);
    assert_eq!(stats.largest_alloc_size, 4096);
    assert_eq!(stats.bytes_limit, Some(64 * MIB));

    allocator.deallocate(a);
    let stats = allocator.stats().unwrap();
    assert_eq!(stats.bytes_in_use, 4096);
    assert_eq!(stats.peak_bytes_in_use, 5120);

    allocator.clear_stats();
    let stats = allocator.stats().unwrap();
    assert_eq!(stats.num_allocs, 0);
    assert_eq!(stats.largest_alloc_size, 0);
    assert_eq!(stats.bytes_in_use, 4096);
    assert_eq!(stats.peak_bytes_in_use, 4096);
    assert_eq!(stats.bytes_limit, Some(64 * MIB));

    allocator.deallocate(b);
    assert_eq!(allocator.stats().unwrap().bytes_in_use, 0);
    assert_eq!(runtime.live_pool_allocations(), 0);
}

#[test]
fn test_requested_size_matches_request() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    assert!(allocator.tracks_allocation_sizes());
    let sizes = [1usize, 255, 256, 4097, 3 * MIB];
    let ptrs: Vec<DevicePtr> = sizes
        .iter()
        .map(|&size| allocator.allocate(64, size).unwrap())
        .collect();

    for (ptr, size) in ptrs.iter().zip(sizes) {
        assert_eq!(allocator.requested_size(*ptr), size);
        assert_eq!(allocator.allocated_size(*ptr), size);
    }
    assert_eq!(allocator.live_allocations(), sizes.len());

    for ptr in ptrs {
        allocator.deallocate(ptr);
    }
    assert_eq!(allocator.live_allocations(), 0);
}

#[test]
fn test_stats_snapshot_is_independent() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    let ptr = allocator.allocate(0, 100).unwrap();
    let snapshot = allocator.stats().unwrap();
    allocator.deallocate(ptr);
    let _ = allocator.allocate(0, 200).unwrap();

    assert_eq!(snapshot.num_allocs, 1);
    assert_eq!(snapshot.bytes_in_use, 100);
}

#[test]
fn test_prewarm_fills_pool_and_resets_stats() {
    let runtime = dummy_runtime(1);
    let pool_size = 32 * MIB;
    let allocator = pool_allocator(
        &runtime,
        PoolAllocatorConfig::new(0, pool_size).with_reserve_memory(true),
    );

    assert_eq!(runtime.pool_alloc_sizes(), vec![pool_size]);
    assert_eq!(runtime.live_pool_allocations(), 0);

    let stats = allocator.stats().unwrap();
    assert_eq!(
        stats,
        AllocatorStats {
            bytes_limit: Some(pool_size),
            ..AllocatorStats::default()
        }
    );

    // The release threshold keeps the pre-filled memory reserved
    let usage = allocator.pool_usage().unwrap();
    assert_eq!(usage.reserved_current, pool_size as u64);
    assert_eq!(usage.used_current, 0);
}

#[test]
fn test_prewarm_skipped_without_pool() {
    let runtime = Arc::new(DummyRuntime::new(1).with_unsupported_device(0));
    let allocator = pool_allocator(
        &runtime,
        PoolAllocatorConfig::new(0, MIB).with_reserve_memory(true),
    );

    assert!(runtime.pool_alloc_sizes().is_empty());
    assert_eq!(allocator.stats().unwrap(), AllocatorStats::default());
}

#[test]
fn test_unsupported_device_degrades_to_unavailable() {
    init_test_logging();
    let runtime = Arc::new(DummyRuntime::new(1).with_unsupported_device(0));
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, 64 * MIB));

    assert!(!allocator.is_pool_available());
    assert!(allocator.unavailable_reason().is_some());
    assert!(allocator.allocate(0, 1024).is_none());
    assert!(allocator.allocate(0, 0).is_none());

    let stats = allocator.stats().unwrap();
    assert_eq!(stats, AllocatorStats::default());
    assert_eq!(stats.bytes_limit, None);
    assert_eq!(runtime.live_streams(), 0);
    assert!(runtime.pool_attributes(0).is_none());
}

#[test]
#[should_panic(expected = "not a live allocation")]
fn test_size_query_for_unknown_address_panics() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));
    let _ = allocator.requested_size(DevicePtr::from_addr(0xdead_b000));
}

#[test]
#[should_panic(expected = "not a live allocation")]
fn test_size_query_after_deallocate_panics() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));
    let ptr = allocator.allocate(0, 64).unwrap();
    allocator.deallocate(ptr);
    let _ = allocator.requested_size(ptr);
}

#[test]
fn test_deterministic_mode_disables_reuse_policies() {
    let runtime = dummy_runtime(1);
    let _allocator = pool_allocator(
        &runtime,
        PoolAllocatorConfig::new(0, MIB).with_deterministic(true),
    );

    let attrs = runtime.pool_attributes(0).unwrap();
    assert!(!attrs.reuse_allow_opportunistic);
    assert!(!attrs.reuse_allow_internal_dependencies);
    assert!(attrs.reuse_follow_event_dependencies);
    assert_eq!(attrs.release_threshold, MIB as u64);
}

#[test]
fn test_default_mode_keeps_driver_reuse_policies() {
    let runtime = dummy_runtime(1);
    let _allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    let attrs = runtime.pool_attributes(0).unwrap();
    assert!(attrs.reuse_allow_opportunistic);
    assert!(attrs.reuse_allow_internal_dependencies);
}

fn position(events: &[DummyEvent], wanted: impl Fn(&DummyEvent) -> bool) -> Option<usize> {
    events.iter().position(wanted)
}

#[test]
fn test_context_workaround_touches_device_zero_first_on_old_driver() {
    init_test_logging();
    let runtime = Arc::new(DummyRuntime::new(2).with_driver_version(50_700_000));
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(1, MIB));

    assert!(allocator.is_pool_available());
    assert_eq!(runtime.sync_mallocs(), vec![(0, 1024)]);

    let events = runtime.events();
    let touch = position(&events, |e| matches!(e, DummyEvent::Malloc { device: 0, .. })).unwrap();
    let touch_free = position(&events, |e| *e == DummyEvent::Free { device: 0 }).unwrap();
    let stream = position(&events, |e| *e == DummyEvent::CreateStream { device: 1 }).unwrap();
    let threshold = position(&events, |e| {
        matches!(e, DummyEvent::SetPoolAttribute { device: 1, .. })
    })
    .unwrap();

    assert!(touch < touch_free);
    assert!(touch_free < stream);
    assert!(touch_free < threshold);
    // Caller's device is restored afterwards
    assert_eq!(runtime.current_device().unwrap(), 0);
}

#[test]
fn test_context_workaround_skipped_on_fixed_driver() {
    let runtime = Arc::new(DummyRuntime::new(2).with_driver_version(60_200_000));
    let _allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(1, MIB));
    assert!(runtime.sync_mallocs().is_empty());
}

#[test]
fn test_context_workaround_policy_overrides() {
    let runtime = Arc::new(DummyRuntime::new(2).with_driver_version(60_200_000));
    let _always = pool_allocator(
        &runtime,
        PoolAllocatorConfig::new(1, MIB)
            .with_primary_context_workaround(PrimaryContextWorkaround::Always),
    );
    assert_eq!(runtime.sync_mallocs(), vec![(0, 1024)]);

    let old = Arc::new(DummyRuntime::new(2).with_driver_version(50_000_000));
    let _never = pool_allocator(&old, isolated_config(1, MIB));
    assert!(old.sync_mallocs().is_empty());
}

#[test]
fn test_context_workaround_never_applies_to_device_zero() {
    let runtime = Arc::new(DummyRuntime::new(2).with_driver_version(50_000_000));
    let _allocator = pool_allocator(
        &runtime,
        PoolAllocatorConfig::new(0, MIB)
            .with_primary_context_workaround(PrimaryContextWorkaround::Always),
    );
    assert!(runtime.sync_mallocs().is_empty());
}

#[test]
fn test_caller_device_preserved_across_operations() {
    let runtime = dummy_runtime(2);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    runtime.set_device(1).unwrap();
    let ptr = allocator.allocate(0, 512).unwrap();
    assert_eq!(runtime.current_device().unwrap(), 1);
    allocator.deallocate(ptr);
    assert_eq!(runtime.current_device().unwrap(), 1);

    let events = runtime.events();
    assert!(events.contains(&DummyEvent::PoolAlloc {
        device: 0,
        size: 512
    }));
    assert!(events.contains(&DummyEvent::PoolFree { device: 0 }));
}

fn with_fallback(runtime: &Arc<DummyRuntime>, policy: FallbackPolicy) -> HipPoolAllocator {
    let fallback: Box<dyn DeviceAllocator> = Box::new(DeviceMallocAllocator::new(runtime.clone(), 0));
    HipPoolAllocator::new(
        runtime.clone(),
        Some(fallback),
        PoolAllocatorConfig::new(0, MIB).with_fallback_policy(policy),
    )
}

#[test]
fn test_fallback_serves_requests_when_pool_unavailable() {
    init_test_logging();
    let runtime = Arc::new(DummyRuntime::new(1).with_unsupported_device(0));
    let allocator = with_fallback(&runtime, FallbackPolicy::WhenPoolUnavailable);

    let ptr = allocator.allocate(0, 256).expect("fallback allocation");
    assert_eq!(runtime.sync_mallocs(), vec![(0, 256)]);
    assert_eq!(allocator.requested_size(ptr), 256);

    let stats = allocator.stats().unwrap();
    assert_eq!(stats.num_allocs, 1);
    assert_eq!(stats.bytes_in_use, 256);

    allocator.deallocate(ptr);
    assert!(runtime.events().contains(&DummyEvent::Free { device: 0 }));
    assert_eq!(allocator.stats().unwrap().bytes_in_use, 0);
}

#[test]
fn test_fallback_never_called_when_disabled() {
    let runtime = Arc::new(DummyRuntime::new(1).with_unsupported_device(0));
    let allocator = with_fallback(&runtime, FallbackPolicy::Disabled);

    assert!(allocator.allocate(0, 256).is_none());
    assert!(runtime.sync_mallocs().is_empty());
}

#[test]
fn test_fallback_unused_while_pool_available() {
    let runtime = dummy_runtime(1);
    let allocator = with_fallback(&runtime, FallbackPolicy::WhenPoolUnavailable);

    let ptr = allocator.allocate(0, 256).unwrap();
    allocator.deallocate(ptr);
    assert!(runtime.sync_mallocs().is_empty());
    assert_eq!(runtime.pool_alloc_sizes(), vec![256]);
}

#[test]
fn test_out_of_memory_returns_none_and_keeps_stats() {
    init_test_logging();
    let runtime = Arc::new(DummyRuntime::new(1).with_pool_capacity(4096));
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, 4096));

    let ptr = allocator.allocate(0, 4000).unwrap();
    let before = allocator.stats().unwrap();

    assert!(allocator.allocate(0, 200).is_none());
    assert_eq!(allocator.stats().unwrap(), before);
    assert_eq!(allocator.live_allocations(), 1);

    allocator.deallocate(ptr);
    assert!(allocator.allocate(0, 200).is_some());
}

#[test]
fn test_injected_allocation_failure_is_transient() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    runtime.fail_next_pool_allocs(2);
    assert!(allocator.allocate(0, 64).is_none());
    assert!(allocator.allocate(0, 64).is_none());
    assert_eq!(allocator.stats().unwrap().num_allocs, 0);

    let ptr = allocator.allocate(0, 64).unwrap();
    assert_eq!(allocator.stats().unwrap().num_allocs, 1);
    allocator.deallocate(ptr);
}

#[test]
fn test_failed_free_still_reconciles_bookkeeping() {
    init_test_logging();
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    let ptr = allocator.allocate(0, 2048).unwrap();
    runtime.set_fail_free(true);
    allocator.deallocate(ptr);
    runtime.set_fail_free(false);

    assert_eq!(allocator.live_allocations(), 0);
    assert_eq!(allocator.stats().unwrap().bytes_in_use, 0);
}

#[test]
fn test_recycled_address_keeps_its_new_size() {
    let runtime = Arc::new(DummyRuntime::new(1).with_address_reuse());
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));

    let first = allocator.allocate(0, 100).unwrap();
    allocator.deallocate(first);

    let second = allocator.allocate(0, 300).unwrap();
    assert_eq!(second, first);
    assert_eq!(allocator.requested_size(second), 300);
    assert_eq!(allocator.live_allocations(), 1);
    assert_eq!(allocator.stats().unwrap().bytes_in_use, 300);

    allocator.deallocate(second);
    assert_eq!(allocator.live_allocations(), 0);
    assert_eq!(allocator.stats().unwrap().bytes_in_use, 0);
}

#[test]
fn test_allocators_on_two_devices_are_independent() {
    let runtime = dummy_runtime(2);
    let first = pool_allocator(&runtime, PoolAllocatorConfig::new(0, MIB));
    let second = pool_allocator(&runtime, isolated_config(1, 2 * MIB));

    let a = first.allocate(0, 100).unwrap();
    let b = second.allocate(0, 300).unwrap();

    assert_eq!(first.name(), "hip_async_0");
    assert_eq!(second.name(), "hip_async_1");
    assert_eq!(first.stats().unwrap().bytes_in_use, 100);
    assert_eq!(second.stats().unwrap().bytes_in_use, 300);
    assert_eq!(second.stats().unwrap().bytes_limit, Some(2 * MIB));
    assert_eq!(runtime.pool_live_bytes(0), 100);
    assert_eq!(runtime.pool_live_bytes(1), 300);

    first.deallocate(a);
    second.deallocate(b);
}

#[test]
fn test_stats_display_lists_counters() {
    let runtime = dummy_runtime(1);
    let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, 4096));
    let ptr = allocator.allocate(0, 512).unwrap();

    let text = allocator.stats().unwrap().to_string();
    assert!(text.contains("Limit:        4096"));
    assert!(text.contains("InUse:        512"));
    assert!(text.contains("NumAllocs:    1"));

    allocator.deallocate(ptr);
}

#[derive(Debug, Clone)]
enum PoolOp {
    Alloc(usize),
    /// Index into the live allocations, taken modulo their count
    Free(usize),
    ClearStats,
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        4 => (0usize..64 * 1024).prop_map(PoolOp::Alloc),
        3 => any::<usize>().prop_map(PoolOp::Free),
        1 => Just(PoolOp::ClearStats),
    ]
}

// Property-based tests
proptest! {
    #[test]
    fn test_stats_track_live_allocations_for_any_sequence(
        ops in prop::collection::vec(pool_op(), 1..200),
        reuse in any::<bool>()
    ) {
        let runtime = DummyRuntime::new(1);
        let runtime = Arc::new(if reuse { runtime.with_address_reuse() } else { runtime });
        let allocator = pool_allocator(&runtime, PoolAllocatorConfig::new(0, 256 * MIB));

        let mut live: Vec<(DevicePtr, usize)> = Vec::new();
        let mut num_allocs = 0u64;
        let mut largest = 0usize;
        let mut peak = 0usize;

        for op in ops {
            match op {
                PoolOp::Alloc(size) => {
                    let ptr = allocator.allocate(256, size).unwrap();
                    live.push((ptr, size));
                    num_allocs += 1;
                    largest = largest.max(size);
                }
                PoolOp::Free(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (ptr, size) = live.swap_remove(index % live.len());
                    prop_assert_eq!(allocator.requested_size(ptr), size);
                    allocator.deallocate(ptr);
                }
                PoolOp::ClearStats => {
                    allocator.clear_stats();
                    num_allocs = 0;
                    largest = 0;
                    peak = live.iter().map(|(_, size)| size).sum();
                }
            }

            let in_use: usize = live.iter().map(|(_, size)| size).sum();
            peak = peak.max(in_use);
            let stats = allocator.stats().unwrap();
            prop_assert_eq!(stats.bytes_in_use, in_use);
            prop_assert!(stats.peak_bytes_in_use >= stats.bytes_in_use);
            prop_assert_eq!(stats.peak_bytes_in_use, peak);
            prop_assert_eq!(stats.num_allocs, num_allocs);
            prop_assert_eq!(stats.largest_alloc_size, largest);
            prop_assert_eq!(stats.bytes_limit, Some(256 * MIB));
        }

        prop_assert_eq!(allocator.live_allocations(), live.len());
        prop_assert_eq!(runtime.pool_live_bytes(0), live.iter().map(|(_, size)| size).sum::<usize>());
        for (ptr, _) in live {
            allocator.deallocate(ptr);
        }
        prop_assert_eq!(allocator.stats().unwrap().bytes_in_use, 0);
    }
}
