//! Lock-free bounded ring allocator.
//!
//! [`RingAllocator`] serves variable-sized blocks out of a fixed circular
//! byte arena, with one fixed-size descriptor per live block forming a FIFO
//! free queue. All cross-thread coordination is compare-and-swap on aligned
//! 8-byte words: the two packed queue descriptors and the descriptor slots
//! themselves. There are no locks, no spinlocks and no syscalls on any path,
//! and progress is lock-free: a stalled thread can delay reclamation of the
//! blocks behind its own, but never another thread's allocation or free.
//!
//! The design trades reclamation generality for determinism: a freed block
//! is only reclaimed once every older block has also been freed, so the
//! arena can never fragment indefinitely as long as old blocks eventually
//! retire. This matches producers that allocate short-lived records and
//! release them in approximately FIFO order, e.g. trace record pools fed by
//! many threads.
//!
//! # Memory layout
//! ```text
//! arena:  [hdr|payload...][hdr|payload...][gap][hdr|payload...]
//!              ^tail blocks in FIFO order             ^head
//! slots:  one 8-byte packed descriptor per block, in the same order
//! ```
//!
//! Each block starts with an 8-byte header naming its descriptor; payloads
//! begin 16 bytes into the block so they are always 16-aligned. A block that
//! would straddle the arena end is pushed to offset zero and the unusable
//! end run is covered by an ownerless gap block, reclaimed together with the
//! block that follows it.

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloc::boxed::Box;

use crate::error::{AllocError, AllocErrorKind, AllocResult};
use crate::layout::{
    ArenaUnit, BLOCK_ALIGN, BlockHeader, DESCRIPTOR_FREE_BIT, Descriptor, HEADER_SIZE, Placement,
    QueueState, UNIT, block_size_for, check_geometry, max_payload, new_arena, plan_reservation,
};
use crate::stats::{AllocatorStats, StatisticsProvider};
use crate::traits::{Allocator, MemoryUsage, Resettable, ThreadSafeAllocator};
use crate::utils::{Backoff, atomic_max, is_aligned};

/// Configuration for [`RingAllocator`] and
/// [`LocalRingAllocator`](crate::local::LocalRingAllocator).
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Maintain allocation counters.
    pub track_stats: bool,

    /// Fill freshly allocated payloads with this byte.
    pub alloc_pattern: Option<u8>,
    /// Fill payloads with this byte on free.
    pub dealloc_pattern: Option<u8>,

    /// Spin with exponential backoff between CAS retries. Ignored by the
    /// single-threaded variant.
    pub use_backoff: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xA5) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDE) } else { None },
            use_backoff: true,
        }
    }
}

impl RingConfig {
    /// Production configuration: no counters, no fill patterns.
    pub fn production() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            use_backoff: true,
        }
    }

    /// Debug configuration: counters on, payloads poisoned on both edges.
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xA5),
            dealloc_pattern: Some(0xDE),
            use_backoff: false,
        }
    }
}

/// Internal counters, maintained when `track_stats` is set.
struct RingCounters {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    failed: AtomicUsize,
    ghosts: AtomicUsize,
    peak: AtomicUsize,
}

impl RingCounters {
    const fn new() -> Self {
        Self {
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            ghosts: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.deallocations.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.ghosts.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }
}

/// Statistics snapshot for [`RingAllocator::stats`].
#[derive(Debug, Clone, Copy)]
pub struct RingStats {
    /// Successful allocations.
    pub allocations: usize,
    /// Deallocations.
    pub deallocations: usize,
    /// Allocations rejected for exhaustion.
    pub failed_allocations: usize,
    /// Descriptor slots burned by failed allocations that could not be
    /// rescinded.
    pub ghost_descriptors: usize,
    /// Bytes currently reserved in the buffer (live + dead + gap blocks).
    pub current_usage: usize,
    /// Peak of `current_usage`.
    pub peak_usage: usize,
    /// Arena capacity in bytes.
    pub capacity: usize,
    /// Descriptor slots currently in the queue.
    pub descriptors_in_use: usize,
}

/// Lock-free bounded allocator over a circular byte arena.
///
/// Create one with a capacity and a descriptor count, share it between
/// threads (it is [`Sync`]), allocate with [`alloc`](Self::alloc) and release
/// with [`free`](Self::free):
///
/// ```
/// use ring_alloc::RingAllocator;
///
/// let pool = RingAllocator::new(4096, 64)?;
/// let record = pool.alloc(100)?;
/// assert_eq!(record.as_ptr() as usize % 16, 0);
/// // ... write the record ...
/// unsafe { pool.free(record) };
/// # Ok::<(), ring_alloc::AllocError>(())
/// ```
///
/// Allocation is O(1). Free is O(k) where k is the number of consecutively
/// freed blocks it uncovers at the queue tail; a freed middle block costs
/// one atomic flag set and is reclaimed later by whichever free reaches it
/// at the tail.
pub struct RingAllocator {
    /// The byte arena, in 16-byte units so block boundaries stay aligned.
    arena: Box<[UnsafeCell<ArenaUnit>]>,

    /// One packed descriptor per slot; all-zero means out-of-queue.
    slots: Box<[AtomicU64]>,

    /// Packed `{tail, len}` of the buffer queue, in 16-byte units.
    buffer_queue: AtomicU64,

    /// Packed `{tail, len}` of the descriptor queue, in slots.
    list_queue: AtomicU64,

    config: RingConfig,
    counters: RingCounters,
}

// The arena is behind UnsafeCell, but a block's bytes are only touched by
// its owner between publish and free; all handoffs go through the release
// publish / acquire read of the owning descriptor slot.
unsafe impl Send for RingAllocator {}
unsafe impl Sync for RingAllocator {}

impl RingAllocator {
    /// Creates a pool with `capacity` arena bytes and `slots` descriptors.
    ///
    /// `capacity` must be a multiple of 16, at least 32 bytes and at most
    /// 4 GiB; `slots` bounds the number of concurrently live blocks.
    ///
    /// # Errors
    /// Returns [`AllocErrorKind::InvalidConfig`] if the geometry is rejected.
    pub fn new(capacity: usize, slots: usize) -> AllocResult<Self> {
        Self::with_config(capacity, slots, RingConfig::default())
    }

    /// Creates a pool with a custom [`RingConfig`].
    ///
    /// # Errors
    /// Returns [`AllocErrorKind::InvalidConfig`] if the geometry is rejected.
    pub fn with_config(capacity: usize, slots: usize, config: RingConfig) -> AllocResult<Self> {
        check_geometry(capacity, slots)?;

        let pool = Self {
            arena: new_arena(capacity / UNIT),
            slots: (0..slots).map(|_| AtomicU64::new(0)).collect(),
            buffer_queue: AtomicU64::new(QueueState::EMPTY.pack()),
            list_queue: AtomicU64::new(QueueState::EMPTY.pack()),
            config,
            counters: RingCounters::new(),
        };

        #[cfg(feature = "logging")]
        tracing::debug!(capacity, slots, "ring allocator created");

        Ok(pool)
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

    /// Bytes currently reserved in the buffer: live blocks, freed blocks not
    /// yet reclaimed, and wrap-around gaps.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.buffer_state().len as usize * UNIT
    }

    /// Current buffer tail position in bytes. Advances monotonically
    /// (modulo capacity) as blocks retire.
    #[inline]
    pub fn tail_offset(&self) -> usize {
        self.buffer_state().tail as usize * UNIT
    }

    /// Current buffer head position in bytes.
    #[inline]
    pub fn head_offset(&self) -> usize {
        let q = self.buffer_state();
        q.head(self.capacity_units()) as usize * UNIT
    }

    /// Descriptor slots currently in the queue (live, dead, ghost or
    /// reserved).
    #[inline]
    pub fn descriptors_in_use(&self) -> usize {
        self.list_state().len as usize
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

    /// Statistics snapshot, when `track_stats` is enabled.
    pub fn stats(&self) -> Option<RingStats> {
        if !self.config.track_stats {
            return None;
        }
        Some(RingStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            deallocations: self.counters.deallocations.load(Ordering::Relaxed),
            failed_allocations: self.counters.failed.load(Ordering::Relaxed),
            ghost_descriptors: self.counters.ghosts.load(Ordering::Relaxed),
            current_usage: self.used_bytes(),
            peak_usage: self.counters.peak.load(Ordering::Relaxed),
            capacity: self.capacity(),
            descriptors_in_use: self.descriptors_in_use(),
        })
    }

    /// Allocates `size` bytes, returning a 16-aligned pointer with at least
    /// `size` usable bytes behind it.
    ///
    /// # Errors
    /// - [`AllocErrorKind::InvalidSize`] for zero-sized requests
    /// - [`AllocErrorKind::ExceedsMaxSize`] when the request can never fit
    /// - [`AllocErrorKind::DescriptorsExhausted`] when every slot is taken
    /// - [`AllocErrorKind::OutOfMemory`] when the buffer is too full
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

        let slot = match self.reserve_slot() {
            Some(slot) => slot,
            None => {
                return Err(self.reject(AllocError::with_size(
                    AllocErrorKind::DescriptorsExhausted,
                    size,
                )));
            }
        };

        let Some(placement) = self.reserve_region(need) else {
            self.abandon_slot(slot);
            return Err(self.reject(AllocError::with_size(AllocErrorKind::OutOfMemory, size)));
        };

        // Header writes for the reserved region. Not observable by other
        // threads until the publish below makes the descriptor non-zero.
        if let Some((gap_offset, gap_len)) = placement.gap {
            let gap = BlockHeader::gap(gap_len * UNIT as u32);
            unsafe {
                self.header_at(gap_offset as usize * UNIT)
                    .store(gap.encode(), Ordering::Release);
            }
        }
        let offset = placement.offset as usize * UNIT;
        let header = BlockHeader {
            owner: slot as i32,
            len: nsize as u32,
        };
        unsafe {
            self.header_at(offset).store(header.encode(), Ordering::Release);
        }
        if let Some(pattern) = self.config.alloc_pattern {
            unsafe {
                ptr::write_bytes(
                    self.base().add(offset + HEADER_SIZE),
                    pattern,
                    nsize - HEADER_SIZE,
                );
            }
        }

        // Publish. Only the reserving thread may touch a reserved slot, so
        // this CAS cannot legitimately lose.
        let entry = Descriptor::live(placement.offset, need);
        if self.slots[slot as usize]
            .compare_exchange(
                Descriptor::RESERVED.raw(),
                entry.raw(),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_err()
        {
            fatal("reserved descriptor changed before publish");
        }

        if self.config.track_stats {
            self.counters.allocations.fetch_add(1, Ordering::Relaxed);
            atomic_max(&self.counters.peak, self.used_bytes());
        }

        Ok(unsafe { NonNull::new_unchecked(self.base().add(offset + HEADER_SIZE)) })
    }

    /// Releases a block previously returned by [`alloc`](Self::alloc).
    ///
    /// Sets the free flag on the owning descriptor, then retires as many
    /// consecutively freed blocks as it can uncover at the queue tail.
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
        let header = BlockHeader::decode(unsafe { self.header_at(offset) }.load(Ordering::Acquire));
        debug_assert!(!header.is_gap(), "pointer references an unowned block");
        debug_assert!((header.owner as usize) < self.slots.len());
        debug_assert!(header.len as usize >= 2 * HEADER_SIZE);

        if let Some(pattern) = self.config.dealloc_pattern {
            unsafe {
                ptr::write_bytes(
                    self.base().add(offset + HEADER_SIZE),
                    pattern,
                    header.len as usize - HEADER_SIZE,
                );
            }
        }

        let previous = Descriptor::from_raw(
            self.slots[header.owner as usize].fetch_or(DESCRIPTOR_FREE_BIT, Ordering::SeqCst),
        );
        debug_assert!(!previous.is_free(), "double free");
        debug_assert!(previous.len() != 0, "freed descriptor carries no block");
        debug_assert_eq!(previous.offset() as usize * UNIT, offset);

        if self.config.track_stats {
            self.counters.deallocations.fetch_add(1, Ordering::Relaxed);
        }

        self.retire();
    }

    // ------------------------------------------------------------------
    // Allocation protocol internals
    // ------------------------------------------------------------------

    #[inline]
    fn capacity_units(&self) -> u32 {
        self.arena.len() as u32
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.arena.as_ptr().cast::<u8>().cast_mut()
    }

    /// Atomic view of the 8-byte block header at `offset`.
    ///
    /// # Safety
    /// `offset` must be 16-aligned and within the arena.
    #[inline]
    unsafe fn header_at(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(is_aligned(offset, BLOCK_ALIGN));
        debug_assert!(offset < self.capacity());
        unsafe { AtomicU64::from_ptr(self.base().add(offset).cast::<u64>()) }
    }

    // Queue and slot words use sequentially consistent operations throughout.
    // Release/acquire alone is not enough for walk termination: the walk that
    // concludes after the last free must observe every free flag, but a plain
    // acquire load of the tail descriptor may legally return a stale value
    // when the flag was set by a thread whose walk already deferred to ours,
    // stranding a dead block until some later operation. Header words carry
    // payload-adjacent data only and stay release/acquire.

    #[inline]
    fn buffer_state(&self) -> QueueState {
        QueueState::unpack(self.buffer_queue.load(Ordering::SeqCst))
    }

    #[inline]
    fn list_state(&self) -> QueueState {
        QueueState::unpack(self.list_queue.load(Ordering::SeqCst))
    }

    fn reject(&self, err: AllocError) -> AllocError {
        if self.config.track_stats {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "logging")]
        tracing::trace!(kind = %err.kind(), "allocation rejected");
        err
    }

    /// Claims the next descriptor slot by growing the list queue. The claimed
    /// slot is guaranteed all-zero: retirement zeroes a slot before moving
    /// the tail past it, and the tail never passes a slot that is still
    /// owned.
    fn reserve_slot(&self) -> Option<u32> {
        let slot_count = self.slots.len() as u32;
        let mut backoff = Backoff::new();
        loop {
            let raw = self.list_queue.load(Ordering::SeqCst);
            let q = QueueState::unpack(raw);
            if q.len == slot_count {
                return None;
            }
            let next = QueueState {
                tail: q.tail,
                len: q.len + 1,
            };
            if self
                .list_queue
                .compare_exchange_weak(raw, next.pack(), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                let slot = q.head(slot_count);
                debug_assert_eq!(
                    self.slots[slot as usize].load(Ordering::SeqCst),
                    0,
                    "reserved descriptor slot was not zero"
                );
                return Some(slot);
            }
            if self.config.use_backoff {
                backoff.spin();
            }
        }
    }

    /// Reserves `need` units of buffer space, retrying while concurrent
    /// operations move the queue underneath us.
    fn reserve_region(&self, need: u32) -> Option<Placement> {
        let capacity = self.capacity_units();
        let mut backoff = Backoff::new();
        loop {
            let raw = self.buffer_queue.load(Ordering::SeqCst);
            let q = QueueState::unpack(raw);
            let placement = plan_reservation(q, capacity, need)?;
            let next = QueueState {
                tail: q.tail,
                len: q.len + placement.reserve,
            };
            if self
                .buffer_queue
                .compare_exchange_weak(raw, next.pack(), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(placement);
            }
            if self.config.use_backoff {
                backoff.spin();
            }
        }
    }

    /// Walks back a slot reservation after the buffer refused the block.
    ///
    /// If our reservation is still the newest, one CAS shrinks the queue and
    /// the slot was never visible. Otherwise the slot becomes a ghost: freed
    /// with no body, retired by the next retirement walk that reaches it.
    fn abandon_slot(&self, slot: u32) {
        let slot_count = self.slots.len() as u32;
        let raw = self.list_queue.load(Ordering::SeqCst);
        let q = QueueState::unpack(raw);
        if q.len > 0 && (q.tail + q.len - 1) % slot_count == slot {
            let next = QueueState {
                tail: q.tail,
                len: q.len - 1,
            };
            if self
                .list_queue
                .compare_exchange(raw, next.pack(), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
        self.slots[slot as usize].store(Descriptor::GHOST.raw(), Ordering::SeqCst);
        if self.config.track_stats {
            self.counters.ghosts.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Free protocol internals
    // ------------------------------------------------------------------

    /// Retires consecutively freed descriptors from the list tail, advancing
    /// both queues. Exits when the tail descriptor is still owned, still in
    /// reservation, or claimed by a concurrent retirement (which then owns
    /// the remaining progress).
    fn retire(&self) {
        loop {
            let raw = self.list_queue.load(Ordering::SeqCst);
            let q = QueueState::unpack(raw);
            if q.len == 0 {
                return;
            }
            let tail = q.tail;
            let entry =
                Descriptor::from_raw(self.slots[tail as usize].load(Ordering::SeqCst));
            if entry.is_reserved() || !entry.is_free() {
                return;
            }

            // Claim this retirement. Losing means another freer owns it.
            if self.slots[tail as usize]
                .compare_exchange(entry.raw(), 0, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                return;
            }

            if !entry.is_ghost() {
                self.release_region(entry);
            }
            self.advance_list_tail(tail);
        }
    }

    /// Returns a retired block's bytes to the buffer, advancing the buffer
    /// tail to the end of the block. The distance is measured from the
    /// current tail, so a gap block left behind by a wrap is absorbed
    /// together with the block that follows it.
    ///
    /// Exclusive: only the thread that claimed the descriptor gets here, and
    /// the list tail has not moved yet, so no other freer can race for the
    /// buffer tail. A CAS loss only ever means a concurrent allocator grew
    /// the length; recompute and retry.
    fn release_region(&self, entry: Descriptor) {
        let capacity = self.capacity_units();
        let end = (entry.offset() + entry.len()) % capacity;
        let mut backoff = Backoff::new();
        loop {
            let raw = self.buffer_queue.load(Ordering::SeqCst);
            let q = QueueState::unpack(raw);
            let skipped = (entry.offset() + capacity - q.tail) % capacity;
            let delta = skipped + entry.len();
            debug_assert!(delta <= q.len, "buffer queue shorter than retired block");
            let next = QueueState {
                tail: end,
                len: q.len - delta,
            };
            if self
                .buffer_queue
                .compare_exchange_weak(raw, next.pack(), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            if self.config.use_backoff {
                backoff.spin();
            }
        }
    }

    /// Moves the list tail past a slot this thread has retired. Retries on
    /// loss: the tail itself cannot move (we own this retirement), only the
    /// length changes under concurrent reservations.
    fn advance_list_tail(&self, tail: u32) {
        let slot_count = self.slots.len() as u32;
        let mut backoff = Backoff::new();
        loop {
            let raw = self.list_queue.load(Ordering::SeqCst);
            let q = QueueState::unpack(raw);
            debug_assert_eq!(q.tail, tail, "list tail moved during exclusive retirement");
            debug_assert!(q.len > 0);
            let next = QueueState {
                tail: (tail + 1) % slot_count,
                len: q.len - 1,
            };
            if self
                .list_queue
                .compare_exchange_weak(raw, next.pack(), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            if self.config.use_backoff {
                backoff.spin();
            }
        }
    }

    /// Checks structural invariants of a quiescent pool, panicking on any
    /// violation. Diagnostic aid for tests and debug builds; the result is
    /// meaningless while operations are in flight.
    pub fn validate(&self) {
        let capacity = self.capacity_units();
        let bq = self.buffer_state();
        let lq = self.list_state();

        // The reserved region decomposes exactly into blocks, and every
        // owned block's descriptor points back at it.
        let mut position = bq.tail;
        let mut walked = 0u32;
        while walked < bq.len {
            let header = BlockHeader::decode(
                unsafe { self.header_at(position as usize * UNIT) }.load(Ordering::Acquire),
            );
            assert!(header.len > 0, "zero-length block in reserved region");
            assert!(
                header.len as usize % UNIT == 0,
                "misaligned block length in reserved region"
            );
            let units = header.len / UNIT as u32;
            if !header.is_gap() {
                let entry = Descriptor::from_raw(
                    self.slots[header.owner as usize].load(Ordering::SeqCst),
                );
                assert_eq!(entry.offset(), position, "descriptor offset mismatch");
                assert_eq!(entry.len(), units, "descriptor length mismatch");
            }
            walked += units;
            position = (position + units) % capacity;
        }
        assert_eq!(walked, bq.len, "blocks overrun the reserved region");

        // In-queue descriptors with bodies appear in ascending buffer
        // position.
        let slot_count = self.slots.len() as u32;
        let mut last_distance = 0u32;
        for i in 0..lq.len {
            let slot = (lq.tail + i) % slot_count;
            let entry = Descriptor::from_raw(self.slots[slot as usize].load(Ordering::SeqCst));
            if entry.is_reserved() || entry.is_ghost() {
                continue;
            }
            let distance = (entry.offset() + capacity - bq.tail) % capacity;
            assert!(
                distance >= last_distance,
                "descriptor order diverges from buffer order"
            );
            last_distance = distance;
        }
    }
}

/// State corruption; the invariants no longer hold and continuing would hand
/// out overlapping memory.
#[cold]
fn fatal(msg: &str) -> ! {
    #[cfg(feature = "logging")]
    tracing::error!(msg, "ring allocator state corrupted");
    panic!("ring allocator state corrupted: {msg}");
}

unsafe impl Allocator for RingAllocator {
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

unsafe impl ThreadSafeAllocator for RingAllocator {}

impl MemoryUsage for RingAllocator {
    fn used_memory(&self) -> usize {
        self.used_bytes()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity() - self.used_bytes())
    }
}

impl Resettable for RingAllocator {
    unsafe fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
        self.buffer_queue
            .store(QueueState::EMPTY.pack(), Ordering::Release);
        self.list_queue
            .store(QueueState::EMPTY.pack(), Ordering::Release);
        if self.config.track_stats {
            self.counters.reset();
        }
    }
}

impl StatisticsProvider for RingAllocator {
    fn statistics(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.used_bytes(),
            peak_allocated_bytes: if self.config.track_stats {
                self.counters.peak.load(Ordering::Relaxed)
            } else {
                self.used_bytes()
            },
            allocation_count: self.counters.allocations.load(Ordering::Relaxed),
            deallocation_count: self.counters.deallocations.load(Ordering::Relaxed),
            failed_allocations: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn reset_statistics(&self) {
        self.counters.reset();
    }

    fn statistics_enabled(&self) -> bool {
        self.config.track_stats
    }
}

impl core::fmt::Debug for RingAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bq = self.buffer_state();
        let lq = self.list_state();
        f.debug_struct("RingAllocator")
            .field("capacity", &self.capacity())
            .field("slot_count", &self.slot_count())
            .field("buffer_tail", &(bq.tail as usize * UNIT))
            .field("buffer_used", &(bq.len as usize * UNIT))
            .field("descriptors_in_use", &lq.len)
            .finish()
    }
}
