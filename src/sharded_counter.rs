//! Striped atomic counter for statistics recorded on the bump hot path.
//!
//! Every page view increments the bump statistic, so a single `AtomicU64`
//! would have every request thread writing the same cache line. Increments
//! are spread over padded slots and summed on read, which is rare.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of slots.
const DEFAULT_SHARDS: usize = 32;

/// One counter slot, aligned to its own cache line.
#[repr(align(128))]
#[derive(Debug, Default)]
struct Slot(AtomicU64);

/// Sharded counter to reduce contention under high concurrency.
/// Slot selection is round-robin per thread, which spreads writes from the
/// same thread as well as from different ones.
#[derive(Debug)]
pub struct ShardedCounter {
    slots: Box<[Slot]>,
}

impl ShardedCounter {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a counter with `shards` slots (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let slots = (0..shards.max(1)).map(|_| Slot::default()).collect();
        Self { slots }
    }

    #[inline]
    fn slot(&self) -> &Slot {
        thread_local! {
            static NEXT: Cell<usize> = const { Cell::new(0) };
        }

        let idx = NEXT.with(|c| {
            let val = c.get();
            c.set(val.wrapping_add(1));
            val % self.slots.len()
        });
        &self.slots[idx]
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.slot().0.fetch_add(n, Ordering::Relaxed);
    }

    /// Sum all slots to get the total count.
    pub fn sum(&self) -> u64 {
        self.slots.iter().map(|s| s.0.load(Ordering::Relaxed)).sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}
