//! Allocator trait family.
//!
//! The pool types expose size-based inherent methods as their primary
//! interface; these traits adapt them to layout-based callers and give
//! embedders a common vocabulary for capacity monitoring and pool reuse.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::error::AllocResult;

/// Raw allocation interface over [`Layout`].
///
/// # Safety
///
/// Implementors must return pointers valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, and must accept in
/// `deallocate` exactly the pointers they handed out, each at most once.
pub unsafe trait Allocator {
    /// Allocates memory for `layout`.
    ///
    /// # Safety
    /// The returned memory is uninitialized and must be initialized before
    /// use.
    ///
    /// # Errors
    /// Returns an error when the pool cannot satisfy the layout.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Deallocates memory previously returned by [`Allocator::allocate`].
    ///
    /// # Safety
    /// - `ptr` must have been allocated by this allocator with `layout`
    /// - after this call `ptr` is invalid; double-free is undefined behavior
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Marker for allocators that are safe to share between threads.
///
/// # Safety
/// Implementors must tolerate fully concurrent `allocate` and `deallocate`
/// calls from any number of threads.
pub unsafe trait ThreadSafeAllocator: Allocator + Send + Sync {}

/// Capacity reporting for bounded pools.
pub trait MemoryUsage {
    /// Bytes currently held by live (and not yet reclaimed) blocks.
    fn used_memory(&self) -> usize;

    /// Bytes still available, or `None` for unbounded allocators.
    fn available_memory(&self) -> Option<usize>;

    /// Total capacity in bytes, or `None` for unbounded allocators.
    fn total_memory(&self) -> Option<usize> {
        self.available_memory().map(|avail| self.used_memory() + avail)
    }

    /// Usage as a percentage of total capacity, when total is known.
    fn memory_usage_percent(&self) -> Option<f32> {
        self.total_memory().map(|total| {
            if total == 0 {
                0.0
            } else {
                (self.used_memory() as f32 / total as f32) * 100.0
            }
        })
    }
}

/// Pools that can be returned wholesale to their initial state.
pub trait Resettable {
    /// Resets the pool, invalidating every outstanding allocation.
    ///
    /// # Safety
    /// No pointer previously returned by the pool may be used afterwards, and
    /// no operation may be in flight on another thread during the call.
    unsafe fn reset(&self);

    /// Whether a reset is currently advisable.
    fn can_reset(&self) -> bool {
        true
    }

    /// Resets only if [`Resettable::can_reset`] allows it.
    ///
    /// # Safety
    /// Same contract as [`Resettable::reset`] when the reset is performed.
    unsafe fn try_reset(&self) -> bool {
        if self.can_reset() {
            unsafe { self.reset() };
            true
        } else {
            false
        }
    }
}
