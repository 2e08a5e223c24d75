//! Geometry and protocol tests for the lock-free pool.
//!
//! All offsets below assume the block sizing rule: a request of `size` bytes
//! occupies `round_up(size, 16) + 16` bytes of arena (16-byte header unit
//! plus the payload rounded to alignment).

use core::alloc::Layout;
use core::ptr::NonNull;

use ring_alloc::{
    Allocator, AllocErrorKind, MemoryUsage, Resettable, RingAllocator, RingConfig,
    StatisticsProvider,
};

/// Moves the pool's tail to `tail` bytes by allocating and retiring a single
/// block spanning exactly that much arena.
fn preload(pool: &RingAllocator, tail: usize) {
    assert!(tail >= 32 && tail % 16 == 0);
    let block = pool.alloc(tail - 16).unwrap();
    unsafe { pool.free(block) };
    assert_eq!(pool.tail_offset(), tail);
    assert!(pool.is_empty());
}

#[test]
fn returned_pointers_are_16_aligned() {
    let pool = RingAllocator::new(4096, 32).unwrap();
    let mut held = Vec::new();
    for size in [1, 7, 8, 15, 16, 17, 100, 1001] {
        let ptr = pool.alloc(size).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 16, 0, "size {size} misaligned");
        held.push(ptr);
    }
    for ptr in held {
        unsafe { pool.free(ptr) };
    }
    assert!(pool.is_empty());
}

#[test]
fn in_order_free_advances_tail_block_by_block() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    let p1 = pool.alloc(10).unwrap(); // 32-byte block at 0
    let p2 = pool.alloc(8).unwrap(); // 32-byte block at 32
    let p3 = pool.alloc(1001).unwrap(); // 1024-byte block at 64

    assert_eq!(pool.used_bytes(), 1088);
    assert_eq!(pool.head_offset(), 1088);
    assert_eq!(pool.tail_offset(), 0);

    unsafe { pool.free(p1) };
    assert_eq!(pool.tail_offset(), 32);
    assert_eq!(pool.used_bytes(), 1056);

    unsafe { pool.free(p2) };
    assert_eq!(pool.tail_offset(), 64);
    assert_eq!(pool.used_bytes(), 1024);

    unsafe { pool.free(p3) };
    assert_eq!(pool.tail_offset(), 1088);
    assert_eq!(pool.used_bytes(), 0);
    assert!(pool.is_empty());
    pool.validate();
}

#[test]
fn middle_free_does_not_move_the_tail() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    let p1 = pool.alloc(10).unwrap();
    let p2 = pool.alloc(8).unwrap();
    let p3 = pool.alloc(1001).unwrap();

    // p2 is not at the tail: the free only flags it
    unsafe { pool.free(p2) };
    assert_eq!(pool.tail_offset(), 0);
    assert_eq!(pool.used_bytes(), 1088);
    assert_eq!(pool.descriptors_in_use(), 3);

    // freeing the tail block cascades through the flagged middle
    unsafe { pool.free(p1) };
    assert_eq!(pool.tail_offset(), 64);
    assert_eq!(pool.used_bytes(), 1024);
    assert_eq!(pool.descriptors_in_use(), 1);

    unsafe { pool.free(p3) };
    assert!(pool.is_empty());
    pool.validate();
}

#[test]
fn reverse_order_free_reclaims_everything_in_one_walk() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    let p1 = pool.alloc(10).unwrap();
    let p2 = pool.alloc(8).unwrap();
    let p3 = pool.alloc(1001).unwrap();

    unsafe { pool.free(p3) };
    unsafe { pool.free(p2) };
    assert_eq!(pool.tail_offset(), 0);
    assert_eq!(pool.used_bytes(), 1088);

    unsafe { pool.free(p1) };
    assert_eq!(pool.tail_offset(), 1088);
    assert!(pool.is_empty());
}

#[test]
fn exact_end_fit_takes_no_gap() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    preload(&pool, 2000);

    // 48-byte block fits the 48 bytes left before the arena end exactly
    let p1 = pool.alloc(30).unwrap();
    assert_eq!(pool.head_offset(), 0);
    assert_eq!(pool.used_bytes(), 48);

    let p2 = pool.alloc(20).unwrap();
    assert_eq!(pool.head_offset(), 48);

    // the end block sits 2000 bytes after the wrapped one
    assert_eq!(
        p1.as_ptr() as usize - p2.as_ptr() as usize,
        2000,
        "end-fit block placed wrong"
    );

    unsafe { pool.free(p1) };
    assert_eq!(pool.tail_offset(), 0);
    unsafe { pool.free(p2) };
    assert_eq!(pool.tail_offset(), 48);
    assert!(pool.is_empty());
    pool.validate();
}

#[test]
fn wrap_inserts_gap_block() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    preload(&pool, 2000);

    // 1024-byte block cannot use the 48-byte end run: it is covered by a
    // gap block and the real block starts at offset zero
    let p = pool.alloc(1000).unwrap();
    assert_eq!(pool.used_bytes(), 48 + 1024);
    assert_eq!(pool.head_offset(), 1024);
    pool.validate();

    // retiring the block absorbs the gap in front of it
    unsafe { pool.free(p) };
    assert_eq!(pool.tail_offset(), 1024);
    assert_eq!(pool.used_bytes(), 0);
    assert!(pool.is_empty());
}

#[test]
fn exact_fill_and_out_of_order_reclaim() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    preload(&pool, 512);

    let p1 = pool.alloc(1500).unwrap(); // 1520 bytes at 512
    assert_eq!(pool.head_offset(), 2032);

    let p2 = pool.alloc(250).unwrap(); // 16-byte gap at 2032, 272 bytes at 0
    assert_eq!(pool.used_bytes(), 1808);
    assert_eq!(pool.head_offset(), 272);

    let p3 = pool.alloc(120).unwrap(); // 144 bytes at 272
    assert_eq!(pool.used_bytes(), 1952);
    assert_eq!(pool.head_offset(), 416);

    // 96 bytes remain; a 128-byte block can't fit
    let err = pool.alloc(104).unwrap_err();
    assert_eq!(err.kind(), AllocErrorKind::OutOfMemory);
    assert_eq!(pool.descriptors_in_use(), 3, "failed alloc must not leak a slot");

    // but a 96-byte block fills the pool exactly: head meets tail while the
    // queue length keeps full distinguishable from empty
    let p5 = pool.alloc(80).unwrap();
    assert_eq!(pool.used_bytes(), 2048);
    assert_eq!(pool.head_offset(), pool.tail_offset());
    assert!(pool.alloc(1).is_err());
    pool.validate();

    unsafe { pool.free(p1) };
    assert_eq!(pool.tail_offset(), 2032);
    assert_eq!(pool.used_bytes(), 528);

    // p3 is in the middle: flag only
    unsafe { pool.free(p3) };
    assert_eq!(pool.tail_offset(), 2032);
    assert_eq!(pool.used_bytes(), 528);

    // p2 uncovers the flagged p3; the walk takes the gap, p2 and p3
    unsafe { pool.free(p2) };
    assert_eq!(pool.tail_offset(), 416);
    assert_eq!(pool.used_bytes(), 96);
    assert_eq!(pool.descriptors_in_use(), 1);

    unsafe { pool.free(p5) };
    assert_eq!(pool.tail_offset(), 512);
    assert!(pool.is_empty());
    pool.validate();
}

#[test]
fn live_blocks_never_overlap() {
    let pool = RingAllocator::new(4096, 64).unwrap();
    let sizes = [100, 1, 640, 48, 17, 256, 33];
    let mut held: Vec<(NonNull<u8>, usize)> = Vec::new();

    for (i, &size) in sizes.iter().enumerate() {
        let ptr = pool.alloc(size).unwrap();
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), i as u8 + 1, size) };
        held.push((ptr, size));
    }
    for (i, &(ptr, size)) in held.iter().enumerate() {
        for &(other, other_size) in &held[i + 1..] {
            let a = ptr.as_ptr() as usize;
            let b = other.as_ptr() as usize;
            assert!(a + size <= b || b + other_size <= a, "blocks overlap");
        }
        // payload survived all the neighbouring writes
        unsafe {
            assert_eq!(ptr.as_ptr().read(), i as u8 + 1);
            assert_eq!(ptr.as_ptr().add(size - 1).read(), i as u8 + 1);
        }
    }
    for (ptr, _) in held {
        unsafe { pool.free(ptr) };
    }
    assert!(pool.is_empty());
}

#[test]
fn repeated_wraps_round_trip_to_empty() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    // two 624-byte blocks fit from any tail position, with or without a gap
    for _ in 0..32 {
        let a = pool.alloc(600).unwrap();
        let b = pool.alloc(600).unwrap();
        unsafe {
            pool.free(a);
            pool.free(b);
        }
        assert!(pool.is_empty(), "queue lengths must return to zero");
        pool.validate();
    }
}

#[test]
fn layout_interface_checks_alignment() {
    let pool = RingAllocator::new(4096, 16).unwrap();

    let too_strict = Layout::from_size_align(64, 32).unwrap();
    let err = unsafe { pool.allocate(too_strict) }.unwrap_err();
    assert_eq!(err.kind(), AllocErrorKind::InvalidAlignment);

    let ok = Layout::from_size_align(64, 16).unwrap();
    let block = unsafe { pool.allocate(ok) }.unwrap();
    assert_eq!(block.len(), 64);
    unsafe { pool.deallocate(block.cast(), ok) };

    // zero-sized layouts do not touch the pool
    let zero = Layout::from_size_align(0, 8).unwrap();
    let dangling = unsafe { pool.allocate(zero) }.unwrap();
    assert_eq!(dangling.len(), 0);
    unsafe { pool.deallocate(dangling.cast(), zero) };
    assert!(pool.is_empty());
}

#[test]
fn rejects_unservable_requests() {
    let pool = RingAllocator::new(2048, 4).unwrap();

    assert_eq!(
        pool.alloc(0).unwrap_err().kind(),
        AllocErrorKind::InvalidSize
    );
    assert_eq!(pool.max_allocation(), 2032);
    assert_eq!(
        pool.alloc(2048).unwrap_err().kind(),
        AllocErrorKind::ExceedsMaxSize
    );
}

#[test]
fn descriptor_exhaustion_is_reported() {
    let pool = RingAllocator::new(4096, 2).unwrap();
    let a = pool.alloc(16).unwrap();
    let b = pool.alloc(16).unwrap();
    let err = pool.alloc(16).unwrap_err();
    assert_eq!(err.kind(), AllocErrorKind::DescriptorsExhausted);
    assert!(err.is_exhausted());
    unsafe {
        pool.free(a);
        pool.free(b);
    }
    assert!(pool.is_empty());
}

#[test]
fn reset_restores_full_capacity() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    let _a = pool.alloc(500).unwrap();
    let _b = pool.alloc(500).unwrap();
    assert!(!pool.is_empty());

    unsafe { pool.reset() };
    assert!(pool.is_empty());
    assert_eq!(pool.tail_offset(), 0);

    let big = pool.alloc(pool.max_allocation()).unwrap();
    unsafe { pool.free(big) };
    assert!(pool.is_empty());

    assert!(pool.can_reset());
    assert!(unsafe { pool.try_reset() });
}

#[test]
fn stats_track_the_pool_lifecycle() {
    let pool = RingAllocator::with_config(2048, 8, RingConfig::debug()).unwrap();
    assert!(pool.statistics_enabled());

    let a = pool.alloc(100).unwrap();
    let b = pool.alloc(200).unwrap();
    assert!(pool.alloc(5000).is_err());
    unsafe { pool.free(a) };

    let stats = pool.stats().unwrap();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.failed_allocations, 1);
    assert_eq!(stats.current_usage, 224); // a (128 bytes) retired at the tail, b (224 bytes) live
    assert_eq!(stats.peak_usage, 352);
    assert_eq!(stats.capacity, 2048);

    let agg = pool.statistics();
    assert_eq!(agg.allocation_count, 2);
    assert!(agg.has_active_allocations());

    unsafe { pool.free(b) };
    pool.reset_statistics();
    assert_eq!(pool.statistics().allocation_count, 0);
}

#[test]
fn memory_usage_reports_capacity() {
    let pool = RingAllocator::new(2048, 8).unwrap();
    assert_eq!(pool.total_memory(), Some(2048));
    assert_eq!(pool.available_memory(), Some(2048));

    let a = pool.alloc(1000).unwrap(); // 1024-byte block
    assert_eq!(pool.used_memory(), 1024);
    assert_eq!(pool.available_memory(), Some(1024));
    let pct = pool.memory_usage_percent().unwrap();
    assert!((pct - 50.0).abs() < 0.01);

    unsafe { pool.free(a) };
    assert_eq!(pool.used_memory(), 0);
}
