use quickcheck_macros::quickcheck;
use std::{prelude::v1::*, rc::Rc};

use super::*;
use crate::tests::MockDevice;

const DEVICE_LOCAL: MemoryPropertyFlags = MemoryPropertyFlags::DEVICE_LOCAL;
const HOST_VISIBLE: MemoryPropertyFlags = MemoryPropertyFlags::HOST_VISIBLE;

fn requirements(size: DeviceSize, alignment: DeviceSize) -> MemoryRequirements {
    MemoryRequirements {
        size,
        alignment,
        memory_type_bits: !0,
    }
}

fn new_allocator(log2_pool_size: u32) -> (Rc<MockDevice>, MemoryAllocator<MockDevice>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Rc::new(MockDevice::new());
    let config = AllocatorConfig {
        log2_pool_size,
        ..AllocatorConfig::default()
    };
    let allocator = MemoryAllocator::new(Rc::clone(&device), MockDevice::properties(), config)
        .expect("valid config");
    (device, allocator)
}

fn assert_disjoint(allocations: &[Allocation<MockDevice>]) {
    for (i, a) in allocations.iter().enumerate() {
        for b in &allocations[i + 1..] {
            if a.memory() == b.memory() {
                assert!(
                    a.offset() + a.size() <= b.offset() || b.offset() + b.size() <= a.offset(),
                    "{:?} overlaps with {:?}",
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn rejects_invalid_config() {
    let config = AllocatorConfig {
        log2_pool_size: 60,
        ..AllocatorConfig::default()
    };
    let result = MemoryAllocator::new(Rc::new(MockDevice::new()), MockDevice::properties(), config);
    assert!(matches!(
        result,
        Err(AllocationError::InvalidConfig {
            log2_pool_size: 60,
            ..
        })
    ));
}

#[test]
fn binds_share_one_pool() {
    let (device, mut allocator) = new_allocator(20);

    let allocations: Vec<_> = (0..8)
        .map(|i| {
            allocator
                .bind(&requirements(1000 + i * 100, 256 << (i % 3)), DEVICE_LOCAL)
                .unwrap()
        })
        .collect();

    assert_eq!(device.state().num_allocations, 1);
    for a in &allocations {
        assert_eq!(a.memory_type_index(), 0);
        assert_eq!(a.offset() % 256, 0);
        assert!(a.size() >= 1000);
    }
    assert_disjoint(&allocations);

    let stats = allocator.statistics();
    assert_eq!(stats.pool_count, 1);
    assert_eq!(stats.reserved, 1 << 20);
    assert_eq!(stats.used, allocations.iter().map(|a| a.size()).sum::<DeviceSize>());
}

#[test]
fn alignment_is_honored() {
    let (_device, mut allocator) = new_allocator(20);

    let _small = allocator.bind(&requirements(256, 256), DEVICE_LOCAL).unwrap();
    let big = allocator.bind(&requirements(4096, 65536), DEVICE_LOCAL).unwrap();
    assert_eq!(big.offset() % 65536, 0);
    assert_eq!(big.size(), 4096);
}

#[test]
fn full_pool_causes_new_pool() {
    let (device, mut allocator) = new_allocator(20);

    let a = allocator.bind(&requirements(1 << 20, 256), DEVICE_LOCAL).unwrap();
    assert_eq!(a.offset(), 0);
    assert_eq!(device.state().num_allocations, 1);

    let b = allocator.bind(&requirements(1 << 20, 256), DEVICE_LOCAL).unwrap();
    assert_ne!(a.memory(), b.memory());
    assert_eq!(device.state().num_allocations, 2);
    assert_eq!(allocator.statistics().pool_count, 2);
}

#[test]
fn freed_region_is_reused() {
    let (device, mut allocator) = new_allocator(20);

    let a = allocator.bind(&requirements(1 << 19, 256), DEVICE_LOCAL).unwrap();
    let (memory, offset) = (a.memory(), a.offset());
    drop(a);
    assert_eq!(allocator.statistics().used, 0);

    let b = allocator.bind(&requirements(1 << 19, 256), DEVICE_LOCAL).unwrap();
    assert_eq!((b.memory(), b.offset()), (memory, offset));
    assert_eq!(device.state().num_allocations, 1);
}

#[test]
fn oversized_request_gets_dedicated_pool() {
    let (device, mut allocator) = new_allocator(20);

    let a = allocator.bind(&requirements(3 << 20, 256), DEVICE_LOCAL).unwrap();
    assert_eq!(a.offset(), 0);
    assert_eq!(device.live_bytes(), 4 << 20);
    assert_eq!(allocator.pools(0).map(|p| p.log2_size()).collect::<Vec<_>>(), [22]);
}

#[test]
fn dedicated_pool_is_not_padded_for_alignment() {
    let (device, mut allocator) = new_allocator(12);

    // A new pool starts at offset 0, so 64 KiB aligned to 64 KiB fits in 64 KiB
    let a = allocator.bind(&requirements(64 << 10, 64 << 10), DEVICE_LOCAL).unwrap();
    assert_eq!(a.offset(), 0);
    assert_eq!(device.live_bytes(), 64 << 10);
}

#[test]
fn aligned_binds_share_one_pool() {
    let (device, mut allocator) = new_allocator(17);

    let a = allocator.bind(&requirements(64 << 10, 64 << 10), DEVICE_LOCAL).unwrap();
    let b = allocator.bind(&requirements(64 << 10, 64 << 10), DEVICE_LOCAL).unwrap();
    assert_eq!(a.memory(), b.memory());
    assert_eq!(device.state().num_allocations, 1);
    assert_eq!(device.live_bytes(), 128 << 10);

    let layout: Vec<_> = allocator
        .pools(0)
        .flat_map(|pool| {
            pool.iter_blocks()
                .map(|b| (b.offset, b.size, b.used))
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(layout, [(0, 64 << 10, true), (64 << 10, 64 << 10, true)]);

    drop(a);
    let layout: Vec<_> = allocator
        .pools(0)
        .flat_map(|pool| pool.iter_blocks().map(|b| b.used).collect::<Vec<_>>())
        .collect();
    assert_eq!(layout, [false, true]);
}

#[test]
fn small_heap_limits_pool_size() {
    let (device, mut allocator) = new_allocator(27);

    let a = allocator.bind(&requirements(4096, 256), DEVICE_LOCAL).unwrap();
    assert_eq!(device.live_bytes(), 128 << 20);

    // The host-visible heap is 256 MiB, so its pools are at most 32 MiB
    let b = allocator.bind(&requirements(4096, 256), HOST_VISIBLE).unwrap();
    assert_eq!(b.memory_type_index(), 1);
    assert_eq!(device.live_bytes(), (128 << 20) + (32 << 20));
    assert_eq!(allocator.pools(1).map(|p| p.size()).collect::<Vec<_>>(), [32 << 20]);

    // Large requests still get a pool large enough
    let c = allocator.bind(&requirements(40 << 20, 256), HOST_VISIBLE).unwrap();
    assert_eq!(allocator.pools(1).map(|p| p.log2_size()).collect::<Vec<_>>(), [25, 26]);
    drop((a, b, c));
}

#[test]
fn invalid_alignment() {
    let (device, mut allocator) = new_allocator(20);
    assert_eq!(
        allocator.bind(&requirements(256, 3), DEVICE_LOCAL).unwrap_err(),
        AllocationError::InvalidAlignment(3)
    );
    assert_eq!(
        allocator.bind(&requirements(256, 0), DEVICE_LOCAL).unwrap_err(),
        AllocationError::InvalidAlignment(0)
    );
    assert_eq!(device.state().num_allocations, 0);
}

#[test]
fn no_compatible_memory_type() {
    let (_device, mut allocator) = new_allocator(20);
    let req = MemoryRequirements {
        size: 256,
        alignment: 256,
        memory_type_bits: 0b10,
    };
    assert_eq!(
        allocator.bind(&req, DEVICE_LOCAL).unwrap_err(),
        AllocationError::NoCompatibleMemoryType {
            memory_type_bits: 0b10,
            properties: DEVICE_LOCAL,
        }
    );

    // Memory type 1 is fine if nothing is required of it
    let a = allocator.bind(&req, MemoryPropertyFlags::empty()).unwrap();
    assert_eq!(a.memory_type_index(), 1);
}

#[test]
fn too_large() {
    let (device, mut allocator) = new_allocator(20);
    for &(size, alignment) in &[(1 << 48, 256), (!0, 1), ((1 << 47) + 1, 1 << 20)] {
        assert_eq!(
            allocator.bind(&requirements(size, alignment), DEVICE_LOCAL).unwrap_err(),
            AllocationError::TooLarge {
                size,
                alignment,
                max_log2_size: MAX_POOL_LOG2_SIZE,
            }
        );
    }
    assert_eq!(device.state().num_allocations, 0);
}

#[test]
fn huge_alignment_is_satisfied_by_new_pool() {
    let (device, mut allocator) = new_allocator(20);
    let a = allocator.bind(&requirements(256, 1 << 63), DEVICE_LOCAL).unwrap();
    assert_eq!(a.offset(), 0);
    assert_eq!(device.live_bytes(), 1 << 20);
}

#[test]
fn device_error_is_propagated() {
    let (device, mut allocator) = new_allocator(20);
    device.state().fail_with = Some("ERROR_OUT_OF_DEVICE_MEMORY");

    match allocator.bind(&requirements(256, 256), DEVICE_LOCAL) {
        Err(AllocationError::Device(e)) => assert_eq!(e.code(), "ERROR_OUT_OF_DEVICE_MEMORY"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(allocator.statistics().pool_count, 0);

    device.state().fail_with = None;
    allocator.bind(&requirements(256, 256), DEVICE_LOCAL).unwrap();
}

#[test]
fn existing_pools_are_used_when_the_device_is_exhausted() {
    let (device, mut allocator) = new_allocator(20);
    let _a = allocator.bind(&requirements(1 << 19, 256), DEVICE_LOCAL).unwrap();
    device.state().budget = Some(1 << 20);

    let _b = allocator.bind(&requirements(1 << 18, 256), DEVICE_LOCAL).unwrap();
    assert!(matches!(
        allocator.bind(&requirements(1 << 19, 256), DEVICE_LOCAL),
        Err(AllocationError::Device(_))
    ));
}

#[test]
fn explicit_pool_allocation() {
    let (device, mut allocator) = new_allocator(20);
    allocator.allocate(16, 1).unwrap();
    assert_eq!(
        device.state().live.values().copied().collect::<Vec<_>>(),
        [(1 << 16, 1)]
    );

    // Served from the pool allocated above
    let a = allocator.bind(&requirements(1024, 256), HOST_VISIBLE).unwrap();
    assert_eq!(device.state().num_allocations, 1);
    drop(a);

    assert!(matches!(
        allocator.allocate(MAX_POOL_LOG2_SIZE + 1, 0),
        Err(AllocationError::InvalidConfig { .. })
    ));
}

#[test]
#[should_panic]
fn explicit_pool_allocation_bad_memory_type() {
    let (_device, mut allocator) = new_allocator(20);
    let _ = allocator.allocate(16, 2);
}

#[test]
fn release_empty_pools() {
    let (device, mut allocator) = new_allocator(20);
    let a = allocator.bind(&requirements(1 << 20, 256), DEVICE_LOCAL).unwrap();
    let b = allocator.bind(&requirements(1 << 20, 256), DEVICE_LOCAL).unwrap();
    assert_eq!(device.live_count(), 2);

    drop(a);
    assert_eq!(allocator.release_empty_pools(), 1);
    assert_eq!(device.live_count(), 1);
    assert_eq!(allocator.release_empty_pools(), 0);

    drop(b);
    assert_eq!(allocator.release_empty_pools(), 1);
    assert_eq!(device.live_count(), 0);
    assert_eq!(allocator.statistics(), AllocatorStatistics::default());
}

#[test]
fn allocation_outlives_allocator() {
    let (device, mut allocator) = new_allocator(20);
    let a = allocator.bind(&requirements(4096, 256), DEVICE_LOCAL).unwrap();
    let _ = allocator.bind(&requirements(4096, 256), HOST_VISIBLE).unwrap();
    drop(allocator);

    // Only the pool `a` is in remains
    assert_eq!(device.live_count(), 1);
    drop(a);
    assert_eq!(device.live_count(), 0);
}

#[quickcheck]
fn random(bytecode: Vec<u8>) {
    random_inner(bytecode);
}

fn random_inner(bytecode: Vec<u8>) -> Option<()> {
    let (device, mut allocator) = new_allocator(16);
    let mut allocations: Vec<Allocation<MockDevice>> = Vec::new();

    let mut it = bytecode.iter().cloned();
    loop {
        match it.next()? % 4 {
            0..=1 => {
                let size = ((it.next()? as DeviceSize) << 8) | it.next()? as DeviceSize;
                let alignment = 1 << (it.next()? % 18);
                let ty = if it.next()? % 4 == 0 {
                    HOST_VISIBLE
                } else {
                    DEVICE_LOCAL
                };
                log::trace!("bind({}, {}, {:?})", size, alignment, ty);
                let a = allocator.bind(&requirements(size, alignment), ty).unwrap();
                assert_eq!(a.offset() % alignment, 0);
                assert!(a.size() >= size);
                allocations.push(a);
                assert_disjoint(&allocations);
            }
            2 => {
                let len = allocations.len();
                if len > 0 {
                    let i = it.next()? as usize % len;
                    allocations.swap_remove(i);
                }
            }
            3 => {
                allocator.release_empty_pools();
            }
            _ => unreachable!(),
        }

        let stats = allocator.statistics();
        assert_eq!(
            stats.used,
            allocations.iter().map(|a| a.size()).sum::<DeviceSize>()
        );
        assert_eq!(stats.reserved, device.live_bytes());
    }
}
