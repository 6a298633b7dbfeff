//! The view counter: in-memory bumps, periodic flush, weekly rollover.

pub mod bucket;
pub mod shard;

pub use bucket::Bucket;
pub use shard::{Shard, ShardKey, ShardedCounterMap};

use crate::clock::Clock;
use crate::config::CounterConfig;
use crate::error::ViewCounterResult;
use crate::flush::{FlushEngine, FlushReport};
use crate::metrics::CounterMetrics;
use crate::scheduler::Scheduler;
use crate::store::{EntityCache, MetaStore, PersistenceSink};
use crate::week::WeekRollover;
use std::sync::Arc;
use tracing::info;

/// External services a [`ViewCounter`] is wired to.
pub struct Collaborators<K: ShardKey> {
    pub sink: Arc<dyn PersistenceSink<K>>,
    pub meta: Arc<dyn MetaStore>,
    pub cache: Option<Arc<dyn EntityCache<K>>>,
    pub clock: Arc<dyn Clock>,
}

/// Counts views per key and periodically persists them.
///
/// Construct one per counted entity kind at startup and share it by `Arc`
/// between request handlers (which call [`bump`](Self::bump)) and the
/// scheduler (see [`register`](Self::register)).
pub struct ViewCounter<K: ShardKey> {
    name: String,
    map: Arc<ShardedCounterMap<K>>,
    flush: FlushEngine<K>,
    rollover: WeekRollover<K>,
    metrics: Arc<CounterMetrics>,
    config: CounterConfig,
}

impl<K: ShardKey> ViewCounter<K> {
    pub fn new(
        name: &str,
        collaborators: Collaborators<K>,
        config: &CounterConfig,
        bookmark_key: &str,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        let map = Arc::new(ShardedCounterMap::new());
        let cache = if config.update_cache {
            collaborators.cache
        } else {
            None
        };

        let flush = FlushEngine::new(
            name,
            Arc::clone(&map),
            Arc::clone(&collaborators.sink),
            cache,
            Arc::clone(&collaborators.clock),
            Arc::clone(&metrics),
        );
        let rollover = WeekRollover::new(
            collaborators.sink,
            collaborators.meta,
            collaborators.clock,
            bookmark_key,
            Arc::clone(&metrics),
        );

        Self {
            name: name.to_string(),
            map,
            flush,
            rollover,
            metrics,
            config: config.clone(),
        }
    }

    /// Construct and restore week state from the bookmark.
    pub async fn start(
        name: &str,
        collaborators: Collaborators<K>,
        config: &CounterConfig,
        bookmark_key: &str,
        metrics: Arc<CounterMetrics>,
    ) -> ViewCounterResult<Arc<Self>> {
        let counter = Self::new(name, collaborators, config, bookmark_key, metrics);
        counter.rollover.init().await?;
        info!(
            counter = %counter.name,
            week = counter.rollover.current_week().await,
            "view counter ready"
        );
        Ok(Arc::new(counter))
    }

    /// Record one view of `key`. Never blocks on I/O and never fails.
    #[inline]
    pub fn bump(&self, key: K) {
        let created = self.map.bump(key);
        self.metrics.record_bump(created);
    }

    /// Views recorded for `key` since its last flush.
    pub fn pending(&self, key: &K) -> Option<u64> {
        self.map.pending(key)
    }

    /// Number of keys with unflushed views.
    pub fn pending_keys(&self) -> usize {
        self.map.len()
    }

    pub async fn flush(&self) -> ViewCounterResult<FlushReport> {
        self.flush.tick().await
    }

    pub async fn roll_week(&self) -> ViewCounterResult<bool> {
        self.rollover.tick().await
    }

    pub fn rollover(&self) -> &WeekRollover<K> {
        &self.rollover
    }

    pub fn metrics(&self) -> &Arc<CounterMetrics> {
        &self.metrics
    }

    /// Register flush and rollover ticks, and their shutdown runs.
    pub fn register(self: &Arc<Self>, scheduler: &mut Scheduler) {
        let flush_name = format!("{}_flush", self.name);
        let week_name = format!("{}_week_reset", self.name);

        let flush = {
            let counter = Arc::clone(self);
            move || {
                let counter = Arc::clone(&counter);
                async move { counter.flush().await.map(|_| ()) }
            }
        };
        let roll = {
            let counter = Arc::clone(self);
            move || {
                let counter = Arc::clone(&counter);
                async move { counter.roll_week().await.map(|_| ()) }
            }
        };

        scheduler.register_periodic(self.config.flush_interval, &flush_name, flush.clone());
        scheduler.register_periodic(self.config.rollover_interval, &week_name, roll.clone());
        if self.config.flush_on_shutdown {
            scheduler.register_shutdown(&flush_name, flush);
        }
        scheduler.register_shutdown(&week_name, roll);
    }
}
