use crate::counter::ShardKey;
use crate::store::EntityCache;
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Shared, atomically updated view total for one cached entity.
#[derive(Debug, Default)]
pub struct ViewHandle {
    view_count: AtomicU64,
}

impl ViewHandle {
    pub fn new(view_count: u64) -> Self {
        Self {
            view_count: AtomicU64::new(view_count),
        }
    }

    pub fn add(&self, views: u64) {
        self.view_count.fetch_add(views, Ordering::Relaxed);
    }

    pub fn view_count(&self) -> u64 {
        self.view_count.load(Ordering::Relaxed)
    }
}

/// Read-through cache of entity view totals.
///
/// Readers get an approximately current total without going to storage; the
/// flush engine pushes each persisted delta into the cached handle. Entries
/// expire after the TTL and are bounded by `max_entries` (TinyLFU eviction
/// via `moka`), so a miss only means the next reader reloads from storage.
pub struct ViewCache<K> {
    inner: MokaCache<K, Arc<ViewHandle>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: ShardKey> ViewCache<K> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_entries as u64)
            .time_to_live(ttl)
            .build();

        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Seed or replace the cached total for `key`, typically after a storage read.
    pub async fn insert(&self, key: K, view_count: u64) {
        self.inner
            .insert(key, Arc::new(ViewHandle::new(view_count)))
            .await;
        trace!("Inserted view total into cache");
    }

    /// Cached view total for `key`.
    pub async fn get(&self, key: &K) -> Option<u64> {
        match self.inner.get(key).await {
            Some(handle) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(handle.view_count())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cached view total for `key`, running `load` to fill the entry on a miss.
    ///
    /// Concurrent misses on the same key share a single load.
    pub async fn get_or_load<F>(&self, key: K, load: F) -> u64
    where
        F: Future<Output = u64>,
    {
        let handle = self
            .inner
            .get_with(key, async move { Arc::new(ViewHandle::new(load.await)) })
            .await;
        handle.view_count()
    }

    pub async fn remove(&self, key: &K) -> Option<u64> {
        self.inner.remove(key).await.map(|h| h.view_count())
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.inner.entry_count() as usize,
        }
    }
}

#[async_trait]
impl<K: ShardKey> EntityCache<K> for ViewCache<K> {
    async fn try_get_for_update(&self, key: &K) -> Option<Arc<ViewHandle>> {
        // Does not count towards reader hit/miss stats.
        self.inner.get(key).await
    }
}
