//! Loom probe for the two-queue reserve/publish/retire protocol.
//!
//! The ring allocator coordinates entirely through CAS on three kinds of
//! 8-byte words: the descriptor-queue word, the buffer-queue word and the
//! descriptor slots. This crate models exactly that word-level protocol on
//! loom atomics — no arena, no headers, no dependency on the allocator crate
//! — and lets loom enumerate the interleavings that matter:
//!
//! - a reservation racing a retirement must still observe its claimed slot
//!   all-zero (the publish CAS asserts this);
//! - two frees racing on the same tail must retire each block exactly once;
//! - a failed allocation racing a free must either rescind its slot or leave
//!   a ghost that the next retirement walk absorbs.
//!
//! Run with:
//!
//! ```text
//! RUSTFLAGS="--cfg loom" cargo test -p ring-alloc-loom-probe \
//!     --features loom-test --release
//! ```

#[cfg(loom)]
mod model {
    use loom::sync::atomic::{AtomicU64, Ordering};

    const FREE_BIT: u64 = 1 << 63;
    const FIELD_BITS: u32 = 28;
    const FIELD_MASK: u64 = (1 << FIELD_BITS) - 1;

    fn pack_queue(tail: u32, len: u32) -> u64 {
        u64::from(tail) | (u64::from(len) << 32)
    }

    fn unpack_queue(raw: u64) -> (u32, u32) {
        (raw as u32, (raw >> 32) as u32)
    }

    fn entry(offset: u32, len: u32) -> u64 {
        (u64::from(offset) << FIELD_BITS) | u64::from(len)
    }

    fn entry_len(raw: u64) -> u32 {
        (raw & FIELD_MASK) as u32
    }

    fn entry_offset(raw: u64) -> u32 {
        ((raw >> FIELD_BITS) & FIELD_MASK) as u32
    }

    /// `(offset, reserve)` for a block of `need` units, or `None` when the
    /// buffer cannot hold it. Mirrors the allocator's placement rule,
    /// including the wrap-around gap.
    fn plan(tail: u32, len: u32, capacity: u32, need: u32) -> Option<(u32, u32)> {
        if tail + len < capacity {
            let head = tail + len;
            let run = capacity - head;
            if need <= run {
                Some((head, need))
            } else if len + run + need > capacity {
                None
            } else {
                Some((0, run + need))
            }
        } else if need > capacity - len {
            None
        } else {
            Some((tail + len - capacity, need))
        }
    }

    /// Word-level model of the allocator's shared state.
    pub struct Probe {
        slots: Vec<AtomicU64>,
        list_queue: AtomicU64,
        buffer_queue: AtomicU64,
        capacity: u32,
    }

    impl Probe {
        pub fn new(capacity: u32, slot_count: usize) -> Self {
            Self {
                slots: (0..slot_count).map(|_| AtomicU64::new(0)).collect(),
                list_queue: AtomicU64::new(0),
                buffer_queue: AtomicU64::new(0),
                capacity,
            }
        }

        /// Reserve a slot, reserve `need` units of buffer, publish. Returns
        /// the slot index, or `None` with the slot rescinded or ghosted.
        pub fn alloc(&self, need: u32) -> Option<usize> {
            let slot_count = self.slots.len() as u32;
            let slot = loop {
                let raw = self.list_queue.load(Ordering::SeqCst);
                let (tail, len) = unpack_queue(raw);
                if len == slot_count {
                    return None;
                }
                if self
                    .list_queue
                    .compare_exchange(
                        raw,
                        pack_queue(tail, len + 1),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let slot = (tail + len) % slot_count;
                    assert_eq!(
                        self.slots[slot as usize].load(Ordering::SeqCst),
                        0,
                        "reserved slot must be observed all-zero"
                    );
                    break slot;
                }
            };

            let offset = loop {
                let raw = self.buffer_queue.load(Ordering::SeqCst);
                let (tail, len) = unpack_queue(raw);
                let Some((offset, reserve)) = plan(tail, len, self.capacity, need) else {
                    self.abandon(slot);
                    return None;
                };
                if self
                    .buffer_queue
                    .compare_exchange(
                        raw,
                        pack_queue(tail, len + reserve),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break offset;
                }
            };

            self.slots[slot as usize]
                .compare_exchange(
                    0,
                    entry(offset, need),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .expect("no other thread may touch a reserved slot");
            Some(slot as usize)
        }

        /// Walk back a reservation after the buffer refused the block.
        fn abandon(&self, slot: u32) {
            let slot_count = self.slots.len() as u32;
            let raw = self.list_queue.load(Ordering::SeqCst);
            let (tail, len) = unpack_queue(raw);
            if len > 0
                && (tail + len - 1) % slot_count == slot
                && self
                    .list_queue
                    .compare_exchange(
                        raw,
                        pack_queue(tail, len - 1),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return;
            }
            self.slots[slot as usize].store(FREE_BIT, Ordering::SeqCst);
        }

        pub fn free(&self, slot: usize) {
            let previous = self.slots[slot].fetch_or(FREE_BIT, Ordering::SeqCst);
            assert_eq!(previous & FREE_BIT, 0, "double free");
            assert_ne!(entry_len(previous), 0, "freed slot carries no block");
            self.retire();
        }

        /// The retirement walk: claim consecutively freed tail slots, return
        /// their buffer units, advance both queues.
        pub fn retire(&self) {
            let slot_count = self.slots.len() as u32;
            loop {
                let raw = self.list_queue.load(Ordering::SeqCst);
                let (tail, len) = unpack_queue(raw);
                if len == 0 {
                    return;
                }
                let e = self.slots[tail as usize].load(Ordering::SeqCst);
                if e == 0 || e & FREE_BIT == 0 {
                    return;
                }
                if self.slots[tail as usize]
                    .compare_exchange(e, 0, Ordering::SeqCst, Ordering::Relaxed)
                    .is_err()
                {
                    // another freer claimed this retirement and owns the
                    // remaining progress
                    return;
                }

                if entry_len(e) != 0 {
                    let end = (entry_offset(e) + entry_len(e)) % self.capacity;
                    loop {
                        let braw = self.buffer_queue.load(Ordering::SeqCst);
                        let (btail, blen) = unpack_queue(braw);
                        let skipped = (entry_offset(e) + self.capacity - btail) % self.capacity;
                        let delta = skipped + entry_len(e);
                        assert!(delta <= blen, "buffer queue shorter than retired block");
                        if self
                            .buffer_queue
                            .compare_exchange(
                                braw,
                                pack_queue(end, blen - delta),
                                Ordering::SeqCst,
                                Ordering::Relaxed,
                            )
                            .is_ok()
                        {
                            break;
                        }
                    }
                }

                loop {
                    let raw2 = self.list_queue.load(Ordering::SeqCst);
                    let (tail2, len2) = unpack_queue(raw2);
                    assert_eq!(tail2, tail, "list tail moved during exclusive retirement");
                    if self
                        .list_queue
                        .compare_exchange(
                            raw2,
                            pack_queue((tail + 1) % slot_count, len2 - 1),
                            Ordering::SeqCst,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }

        /// Buffer units currently reserved.
        pub fn used(&self) -> u32 {
            unpack_queue(self.buffer_queue.load(Ordering::SeqCst)).1
        }

        /// Descriptor slots currently in the queue.
        pub fn in_use(&self) -> u32 {
            unpack_queue(self.list_queue.load(Ordering::SeqCst)).1
        }
    }
}

#[cfg(all(loom, test))]
mod tests {
    use loom::sync::Arc;
    use loom::thread;

    use super::model::Probe;

    #[test]
    fn reserve_racing_retire_observes_zero_slot() {
        loom::model(|| {
            let probe = Arc::new(Probe::new(16, 3));
            let a = probe.alloc(4).expect("empty pool");

            let freer = {
                let probe = Arc::clone(&probe);
                thread::spawn(move || probe.free(a))
            };
            let allocator = {
                let probe = Arc::clone(&probe);
                thread::spawn(move || probe.alloc(4).expect("capacity for both blocks"))
            };

            freer.join().unwrap();
            let b = allocator.join().unwrap();
            probe.free(b);

            assert_eq!(probe.in_use(), 0);
            assert_eq!(probe.used(), 0);
        });
    }

    #[test]
    fn concurrent_frees_retire_each_block_exactly_once() {
        loom::model(|| {
            let probe = Arc::new(Probe::new(16, 3));
            let a = probe.alloc(4).unwrap();
            let b = probe.alloc(4).unwrap();

            let t1 = {
                let probe = Arc::clone(&probe);
                thread::spawn(move || probe.free(a))
            };
            let t2 = {
                let probe = Arc::clone(&probe);
                thread::spawn(move || probe.free(b))
            };
            t1.join().unwrap();
            t2.join().unwrap();

            // whichever walk abandoned at the claim CAS, the winner carried
            // the cascade through both blocks
            assert_eq!(probe.in_use(), 0);
            assert_eq!(probe.used(), 0);
        });
    }

    #[test]
    fn failed_alloc_racing_free_leaves_no_residue() {
        loom::model(|| {
            let probe = Arc::new(Probe::new(8, 3));
            let a = probe.alloc(6).unwrap();

            let allocator = {
                let probe = Arc::clone(&probe);
                // fails against a live 6-unit block, succeeds (with a
                // wrap-around gap) once the free has retired it
                thread::spawn(move || probe.alloc(4))
            };
            let freer = {
                let probe = Arc::clone(&probe);
                thread::spawn(move || probe.free(a))
            };

            let outcome = allocator.join().unwrap();
            freer.join().unwrap();
            if let Some(b) = outcome {
                probe.free(b);
            }

            // a ghost deposited after the last free lingers until a walk
            // reaches it; the next operation's walk absorbs it
            probe.retire();
            assert_eq!(probe.in_use(), 0);
            assert_eq!(probe.used(), 0);
        });
    }
}
