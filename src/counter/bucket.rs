use std::sync::{Mutex, PoisonError};

/// A single counter cell with its own lock.
///
/// Buckets live inside a shard map and are only reachable while that shard's
/// map lock is held, so the count observed after the bucket is removed from
/// the map is final.
#[derive(Debug, Default)]
pub struct Bucket {
    count: Mutex<u64>,
}

impl Bucket {
    pub fn with_count(count: u64) -> Self {
        Self {
            count: Mutex::new(count),
        }
    }

    #[inline]
    pub fn increment(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_add(1);
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume the bucket and return its final count.
    pub fn into_count(self) -> u64 {
        self.count
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
