//! Single-threaded ring allocator.
//!
//! Same arena geometry and on-memory encoding as
//! [`RingAllocator`](crate::ring::RingAllocator), with `Cell`-based
//! bookkeeping instead of atomics. For callers that pin a pool to one thread
//! this removes every atomic operation from the hot path; the type is
//! deliberately not [`Sync`].
//!
//! Two simplifications fall out of single-threadedness: a failed allocation
//! can always rescind its descriptor slot (so ghost descriptors never occur),
//! and the retirement walk never has to arbitrate with a concurrent freer.

use core::alloc::Layout;
use core::cell::{Cell, UnsafeCell};
use core::ptr::{self, NonNull};

use alloc::boxed::Box;

use crate::error::{AllocError, AllocErrorKind, AllocResult};
use crate::layout::{
    ArenaUnit, BLOCK_ALIGN, BlockHeader, Descriptor, HEADER_SIZE, QueueState, UNIT,
    block_size_for, check_geometry, max_payload, new_arena, plan_reservation,
};
use crate::ring::RingConfig;
use crate::stats::{AllocatorStats, StatisticsProvider};
use crate::traits::{Allocator, MemoryUsage, Resettable};
use crate::utils::is_aligned;

#[derive(Default)]
struct LocalCounters {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    failed: Cell<usize>,
    peak: Cell<usize>,
}

impl LocalCounters {
    fn reset(&self) {
        self.allocations.set(0);
        self.deallocations.set(0);
        self.failed.set(0);
        self.peak.set(0);
    }
}

/// Single-threaded bounded allocator over a circular byte arena.
///
/// ```
/// use ring_alloc::LocalRingAllocator;
///
/// let pool = LocalRingAllocator::new(4096, 64)?;
/// let record = pool.alloc(100)?;
/// unsafe { pool.free(record) };
/// # Ok::<(), ring_alloc::AllocError>(())
/// ```
pub struct LocalRingAllocator {
    arena: Box<[UnsafeCell<ArenaUnit>]>,
    slots: Box<[Cell<u64>]>,
    buffer_queue: Cell<u64>,
    list_queue: Cell<u64>,
    config: RingConfig,
    counters: LocalCounters,
}

impl LocalRingAllocator {
    /// Creates a pool with `capacity` arena bytes and `slots` descriptors.
    ///
    /// # Errors
    /// Returns [`AllocErrorKind::InvalidConfig`] if the geometry is rejected.
    pub fn new(capacity: usize, slots: usize) -> AllocResult<Self> {
        Self::with_config(capacity, slots, RingConfig::default())
    }

    /// Creates a pool with a custom [`RingConfig`]. `use_backoff` is ignored.
    ///
    /// # Errors
    /// Returns [`AllocErrorKind::InvalidConfig`] if the geometry is rejected.
    pub fn with_config(capacity: usize, slots: usize, config: RingConfig) -> AllocResult<Self> {
        check_geometry(capacity, slots)?;
        Ok(Self {
            arena: new_arena(capacity / UNIT),
            slots: (0..slots).map(|_| Cell::new(0)).collect(),
            buffer_queue: Cell::new(QueueState::EMPTY.pack()),
            list_queue: Cell::new(QueueState::EMPTY.pack()),
            config,
            counters: LocalCounters::default(),
        })
    }

    /// Arena capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.len() * UNIT
    }

    /// Number of descriptor slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Largest payload this pool can ever serve.
    #[inline]
    pub fn max_allocation(&self) -> usize {
        max_payload(self.capacity())
    }

    /// Bytes currently reserved in the buffer.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        QueueState::unpack(self.buffer_queue.get()).len as usize * UNIT
    }

    /// Current buffer tail position in bytes.
    #[inline]
    pub fn tail_offset(&self) -> usize {
        QueueState::unpack(self.buffer_queue.get()).tail as usize * UNIT
    }

    /// Current buffer head position in bytes.
    #[inline]
    pub fn head_offset(&self) -> usize {
        let q = QueueState::unpack(self.buffer_queue.get());
        q.head(self.capacity_units()) as usize * UNIT
    }

    /// Descriptor slots currently in the queue.
    #[inline]
    pub fn descriptors_in_use(&self) -> usize {
        QueueState::unpack(self.list_queue.get()).len as usize
    }

    /// Whether no block or descriptor is outstanding.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_bytes() == 0 && self.descriptors_in_use() == 0
    }

    /// Whether `ptr` points into this pool's arena.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.base() as usize;
        addr >= base && addr < base + self.capacity()
    }

    /// Allocates `size` bytes, returning a 16-aligned pointer.
    ///
    /// # Errors
    /// Same kinds as [`RingAllocator::alloc`](crate::ring::RingAllocator::alloc),
    /// except that descriptor slots are never burned by failed allocations.
    pub fn alloc(&self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(self.reject(AllocError::with_size(AllocErrorKind::InvalidSize, size)));
        }
        if size > self.max_allocation() {
            return Err(self.reject(AllocError::with_size(AllocErrorKind::ExceedsMaxSize, size)));
        }
        let nsize = block_size_for(size)
            .ok_or_else(|| self.reject(AllocError::with_size(AllocErrorKind::SizeOverflow, size)))?;
        let need = (nsize / UNIT) as u32;

        let lq = QueueState::unpack(self.list_queue.get());
        let slot_count = self.slots.len() as u32;
        if lq.len == slot_count {
            return Err(self.reject(AllocError::with_size(
                AllocErrorKind::DescriptorsExhausted,
                size,
            )));
        }

        let bq = QueueState::unpack(self.buffer_queue.get());
        let Some(placement) = plan_reservation(bq, self.capacity_units(), need) else {
            // nothing was claimed; single-threaded failure leaves no trace
            return Err(self.reject(AllocError::with_size(AllocErrorKind::OutOfMemory, size)));
        };

        if let Some((gap_offset, gap_len)) = placement.gap {
            let gap = BlockHeader::gap(gap_len * UNIT as u32);
            unsafe { self.write_header(gap_offset as usize * UNIT, gap) };
        }
        let slot = lq.head(slot_count);
        let offset = placement.offset as usize * UNIT;
        let header = BlockHeader {
            owner: slot as i32,
            len: nsize as u32,
        };
        unsafe { self.write_header(offset, header) };
        if let Some(pattern) = self.config.alloc_pattern {
            unsafe {
                ptr::write_bytes(
                    self.base().add(offset + HEADER_SIZE),
                    pattern,
                    nsize - HEADER_SIZE,
                );
            }
        }

        debug_assert_eq!(self.slots[slot as usize].get(), 0);
        self.slots[slot as usize].set(Descriptor::live(placement.offset, need).raw());
        self.list_queue.set(
            QueueState {
                tail: lq.tail,
                len: lq.len + 1,
            }
            .pack(),
        );
        self.buffer_queue.set(
            QueueState {
                tail: bq.tail,
                len: bq.len + placement.reserve,
            }
            .pack(),
        );

        if self.config.track_stats {
            self.counters
                .allocations
                .set(self.counters.allocations.get() + 1);
            let used = self.used_bytes();
            if used > self.counters.peak.get() {
                self.counters.peak.set(used);
            }
        }

        Ok(unsafe { NonNull::new_unchecked(self.base().add(offset + HEADER_SIZE)) })
    }

    /// Releases a block previously returned by [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// - `ptr` must come from `self.alloc` and must not have been freed
    /// - the block's payload must no longer be accessed
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        debug_assert!(
            self.contains(ptr.as_ptr()),
            "pointer does not belong to this pool"
        );
        debug_assert!(is_aligned(ptr.as_ptr() as usize, BLOCK_ALIGN));

        let offset = ptr.as_ptr() as usize - self.base() as usize - HEADER_SIZE;
        let header = unsafe { self.read_header(offset) };
        debug_assert!(!header.is_gap(), "pointer references an unowned block");
        debug_assert!((header.owner as usize) < self.slots.len());

        if let Some(pattern) = self.config.dealloc_pattern {
            unsafe {
                ptr::write_bytes(
                    self.base().add(offset + HEADER_SIZE),
                    pattern,
                    header.len as usize - HEADER_SIZE,
                );
            }
        }

        let slot = &self.slots[header.owner as usize];
        let previous = Descriptor::from_raw(slot.get());
        debug_assert!(!previous.is_free(), "double free");
        debug_assert!(previous.len() != 0, "freed descriptor carries no block");
        debug_assert_eq!(previous.offset() as usize * UNIT, offset);
        slot.set(previous.freed().raw());

        if self.config.track_stats {
            self.counters
                .deallocations
                .set(self.counters.deallocations.get() + 1);
        }

        self.retire();
    }

    #[inline]
    fn capacity_units(&self) -> u32 {
        self.arena.len() as u32
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.arena.as_ptr().cast::<u8>().cast_mut()
    }

    /// # Safety
    /// `offset` must be 16-aligned and within the arena.
    #[inline]
    unsafe fn write_header(&self, offset: usize, header: BlockHeader) {
        debug_assert!(is_aligned(offset, BLOCK_ALIGN));
        debug_assert!(offset < self.capacity());
        unsafe { self.base().add(offset).cast::<u64>().write(header.encode()) };
    }

    /// # Safety
    /// `offset` must be 16-aligned and within the arena.
    #[inline]
    unsafe fn read_header(&self, offset: usize) -> BlockHeader {
        debug_assert!(is_aligned(offset, BLOCK_ALIGN));
        debug_assert!(offset < self.capacity());
        BlockHeader::decode(unsafe { self.base().add(offset).cast::<u64>().read() })
    }

    fn reject(&self, err: AllocError) -> AllocError {
        if self.config.track_stats {
            self.counters.failed.set(self.counters.failed.get() + 1);
        }
        err
    }

    /// Retires consecutively freed descriptors from the list tail. The
    /// buffer tail advances to each retired block's end, absorbing a gap
    /// block left behind by a wrap.
    fn retire(&self) {
        let capacity = self.capacity_units();
        let slot_count = self.slots.len() as u32;
        loop {
            let lq = QueueState::unpack(self.list_queue.get());
            if lq.len == 0 {
                return;
            }
            let entry = Descriptor::from_raw(self.slots[lq.tail as usize].get());
            if !entry.is_free() {
                return;
            }

            self.slots[lq.tail as usize].set(0);
            if !entry.is_ghost() {
                let bq = QueueState::unpack(self.buffer_queue.get());
                let skipped = (entry.offset() + capacity - bq.tail) % capacity;
                let delta = skipped + entry.len();
                debug_assert!(delta <= bq.len);
                self.buffer_queue.set(
                    QueueState {
                        tail: (entry.offset() + entry.len()) % capacity,
                        len: bq.len - delta,
                    }
                    .pack(),
                );
            }
            self.list_queue.set(
                QueueState {
                    tail: (lq.tail + 1) % slot_count,
                    len: lq.len - 1,
                }
                .pack(),
            );
        }
    }
}

unsafe impl Allocator for LocalRingAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.align() > BLOCK_ALIGN {
            return Err(self.reject(AllocError::new(AllocErrorKind::InvalidAlignment)));
        }
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }
        let ptr = self.alloc(layout.size())?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        unsafe { self.free(ptr) };
    }
}

impl MemoryUsage for LocalRingAllocator {
    fn used_memory(&self) -> usize {
        self.used_bytes()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity() - self.used_bytes())
    }
}

impl Resettable for LocalRingAllocator {
    unsafe fn reset(&self) {
        for slot in &self.slots {
            slot.set(0);
        }
        self.buffer_queue.set(QueueState::EMPTY.pack());
        self.list_queue.set(QueueState::EMPTY.pack());
        if self.config.track_stats {
            self.counters.reset();
        }
    }
}

impl StatisticsProvider for LocalRingAllocator {
    fn statistics(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.used_bytes(),
            peak_allocated_bytes: if self.config.track_stats {
                self.counters.peak.get()
            } else {
                self.used_bytes()
            },
            allocation_count: self.counters.allocations.get(),
            deallocation_count: self.counters.deallocations.get(),
            failed_allocations: self.counters.failed.get(),
        }
    }

    fn reset_statistics(&self) {
        self.counters.reset();
    }

    fn statistics_enabled(&self) -> bool {
        self.config.track_stats
    }
}

impl core::fmt::Debug for LocalRingAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalRingAllocator")
            .field("capacity", &self.capacity())
            .field("slot_count", &self.slot_count())
            .field("used_bytes", &self.used_bytes())
            .field("descriptors_in_use", &self.descriptors_in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_alloc_leaves_no_trace() {
        let pool = LocalRingAllocator::with_config(2048, 4, RingConfig::debug()).unwrap();
        let block = pool.alloc(2000).unwrap();
        assert!(pool.alloc(200).is_err());
        assert_eq!(pool.descriptors_in_use(), 1);
        unsafe { pool.free(block) };
        assert!(pool.is_empty());
        assert_eq!(pool.statistics().failed_allocations, 1);
    }

    #[test]
    fn sendable_across_threads() {
        // The pool moves between threads; Cell bookkeeping keeps it !Sync.
        fn assert_send<T: Send>() {}
        assert_send::<LocalRingAllocator>();
    }
}
