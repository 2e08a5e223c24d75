//! # ring-alloc
//!
//! Bounded, deterministic, lock-free memory allocation over a fixed circular
//! arena, for embedded and latency-sensitive systems that need
//! `malloc`/`free`-like semantics without the operating system, locks or
//! context switches.
//!
//! The intended workload is trace record pools and similar inter-process
//! plumbing: many producers allocate small, short-lived blocks out of a
//! shared pool and release them in approximately FIFO order — strict FIFO
//! per producer, interleaved across producers. Under that pattern the pool
//! never fragments indefinitely: every freed block is reclaimed as soon as
//! all older blocks are freed too.
//!
//! Two allocators share one design:
//!
//! - [`RingAllocator`] — the lock-free variant. All cross-thread
//!   coordination is compare-and-swap on 8-byte words; progress is
//!   lock-free and no operation ever blocks or calls into the OS.
//! - [`LocalRingAllocator`] — the single-threaded variant, `Cell`-based,
//!   for pools pinned to one thread.
//!
//! ```
//! use ring_alloc::RingAllocator;
//!
//! let pool = RingAllocator::new(64 * 1024, 256)?;
//! let record = pool.alloc(48)?;
//! // every pointer is 16-aligned with at least the requested bytes behind it
//! assert_eq!(record.as_ptr() as usize % 16, 0);
//! unsafe { pool.free(record) };
//! assert!(pool.is_empty());
//! # Ok::<(), ring_alloc::AllocError>(())
//! ```
//!
//! # Design constraints
//!
//! - Alignment is fixed at 16 bytes; each block carries a 16-byte header.
//! - Arena capacity is bounded at 4 GiB so offsets pack into 8-byte
//!   descriptor words.
//! - Freed blocks that are not at the queue tail stay unavailable until all
//!   older blocks are freed (no coalescing, no best-fit). Allocation is
//!   O(1); free is O(k) in the blocks it uncovers at the tail.
//!
//! # Features
//!
//! - `std` (default): error trait conveniences. The core works in
//!   `#![no_std]` with `alloc`.
//! - `logging` (default, implies `std`): `tracing` diagnostics on pool
//!   creation, allocation rejection and corruption.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod error;
mod layout;
pub mod local;
pub mod ring;
pub mod stats;
pub mod traits;
pub mod utils;

pub use error::{AllocError, AllocErrorKind, AllocResult};
pub use layout::{BLOCK_ALIGN, HEADER_SIZE};
pub use local::LocalRingAllocator;
pub use ring::{RingAllocator, RingConfig, RingStats};
pub use stats::{AllocatorStats, StatisticsProvider};
pub use traits::{Allocator, MemoryUsage, Resettable, ThreadSafeAllocator};
