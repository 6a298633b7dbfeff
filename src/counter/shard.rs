//! Two-way sharded map of per-key view buckets.
//!
//! Keys are routed to one of two shards by a cheap, fixed predicate (parity
//! for integer IDs). Each shard is a `RwLock<HashMap<K, Bucket>>`: the common
//! case of bumping an already-present key only takes the shard's read lock
//! plus the bucket's own mutex, so bumps of different keys never serialize
//! on a shared lock. The write lock is taken on first touch of a key and when
//! a flush removes it.
//!
//! Two shards is a fixed choice. Lock order is always map lock, then bucket
//! lock.

use super::bucket::Bucket;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One of the two partitions of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shard {
    Odd,
    Even,
}

impl Shard {
    /// Drain order used by the flush engine.
    pub const ALL: [Shard; 2] = [Shard::Odd, Shard::Even];

    fn from_low_bit(bit: u64) -> Self {
        if bit & 1 == 0 {
            Shard::Even
        } else {
            Shard::Odd
        }
    }
}

/// A key that can be counted. Routing must be deterministic for a given key.
pub trait ShardKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {
    fn shard(&self) -> Shard;
}

macro_rules! impl_shard_key_for_int {
    ($($t:ty),*) => {
        $(
            impl ShardKey for $t {
                #[inline]
                fn shard(&self) -> Shard {
                    Shard::from_low_bit(*self as u64)
                }
            }
        )*
    };
}

impl_shard_key_for_int!(u32, u64, usize, i32, i64);

impl ShardKey for String {
    fn shard(&self) -> Shard {
        // FNV-1a, stable across processes and releases
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.bytes() {
            h ^= u64::from(byte);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        Shard::from_low_bit(h)
    }
}

type ShardMap<K> = RwLock<HashMap<K, Bucket>>;

/// Per-key in-memory view counts, split across two independently locked shards.
#[derive(Debug)]
pub struct ShardedCounterMap<K: ShardKey> {
    odd: ShardMap<K>,
    even: ShardMap<K>,
}

impl<K: ShardKey> ShardedCounterMap<K> {
    pub fn new() -> Self {
        Self {
            odd: RwLock::new(HashMap::new()),
            even: RwLock::new(HashMap::new()),
        }
    }

    fn shard_map(&self, shard: Shard) -> &ShardMap<K> {
        match shard {
            Shard::Odd => &self.odd,
            Shard::Even => &self.even,
        }
    }

    fn read(map: &ShardMap<K>) -> RwLockReadGuard<'_, HashMap<K, Bucket>> {
        map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(map: &ShardMap<K>) -> RwLockWriteGuard<'_, HashMap<K, Bucket>> {
        map.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one view to `key`. Returns true if this call created the bucket.
    ///
    /// The shard read lock stays held while the bucket is incremented, so a
    /// concurrent removal either happens before the lookup (and this bump
    /// lands on a fresh bucket) or after the increment (and the drain sees it).
    #[inline]
    pub fn bump(&self, key: K) -> bool {
        let map = self.shard_map(key.shard());

        {
            let buckets = Self::read(map);
            if let Some(bucket) = buckets.get(&key) {
                bucket.increment();
                return false;
            }
        }

        // Another bumper may have created the bucket between the two locks.
        let mut buckets = Self::write(map);
        match buckets.entry(key) {
            Entry::Occupied(entry) => {
                entry.get().increment();
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Bucket::with_count(1));
                true
            }
        }
    }

    /// Snapshot of the keys currently held by `shard`.
    pub fn keys(&self, shard: Shard) -> Vec<K> {
        Self::read(self.shard_map(shard)).keys().cloned().collect()
    }

    /// Remove `key` and return its accumulated count.
    ///
    /// Returns `None` if the key is not present (already drained).
    pub fn take(&self, key: &K) -> Option<u64> {
        let removed = Self::write(self.shard_map(key.shard())).remove(key);
        removed.map(Bucket::into_count)
    }

    /// Current un-flushed count for `key`.
    pub fn pending(&self, key: &K) -> Option<u64> {
        Self::read(self.shard_map(key.shard()))
            .get(key)
            .map(Bucket::count)
    }

    pub fn shard_len(&self, shard: Shard) -> usize {
        Self::read(self.shard_map(shard)).len()
    }

    pub fn len(&self) -> usize {
        Shard::ALL.iter().map(|s| self.shard_len(*s)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: ShardKey> Default for ShardedCounterMap<K> {
    fn default() -> Self {
        Self::new()
    }
}
