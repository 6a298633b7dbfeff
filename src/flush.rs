//! Moves accumulated in-memory view counts into the persistence sink.
//!
//! Delivery is at-most-once: a bucket is removed from its shard before its
//! count is written, so a failed write loses that batch instead of retrying
//! it. View counts are advisory, and this keeps the hot path free of any
//! bookkeeping for in-flight batches.

use crate::clock::Clock;
use crate::counter::{Shard, ShardKey, ShardedCounterMap};
use crate::error::ViewCounterResult;
use crate::metrics::CounterMetrics;
use crate::store::{EntityCache, PersistenceSink, ViewDelta};
use crate::week::Parity;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub keys_flushed: usize,
    pub views_flushed: u64,
    pub skipped_zero: usize,
    pub entities_missing: usize,
}

pub struct FlushEngine<K: ShardKey> {
    name: String,
    map: Arc<ShardedCounterMap<K>>,
    sink: Arc<dyn PersistenceSink<K>>,
    cache: Option<Arc<dyn EntityCache<K>>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<CounterMetrics>,
    // Periodic and shutdown drains must not interleave.
    pass: Mutex<()>,
}

impl<K: ShardKey> FlushEngine<K> {
    pub fn new(
        name: &str,
        map: Arc<ShardedCounterMap<K>>,
        sink: Arc<dyn PersistenceSink<K>>,
        cache: Option<Arc<dyn EntityCache<K>>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        Self {
            name: name.to_string(),
            map,
            sink,
            cache,
            clock,
            metrics,
            pass: Mutex::new(()),
        }
    }

    /// Scheduler entry point: drain and log what was written.
    pub async fn tick(&self) -> ViewCounterResult<FlushReport> {
        let report = self.drain().await?;
        if report.keys_flushed > 0 || report.entities_missing > 0 {
            debug!(
                operation = "flush",
                counter = %self.name,
                keys = report.keys_flushed,
                views = report.views_flushed,
                missing = report.entities_missing,
                "view counts flushed"
            );
        }
        Ok(report)
    }

    /// Drain every key present in either shard at the start of the pass.
    ///
    /// Stops at the first failed write. The failed batch is lost; keys not yet
    /// visited stay in memory for the next pass.
    pub async fn drain(&self) -> ViewCounterResult<FlushReport> {
        let _pass = self.pass.lock().await;
        let mut report = FlushReport::default();

        for shard in Shard::ALL {
            // Bumps keep landing while we write; keys created after this
            // snapshot are picked up by the next pass.
            for key in self.map.keys(shard) {
                let Some(count) = self.map.take(&key) else {
                    continue;
                };
                self.insert_chunk(&key, count, &mut report)
                    .await
                    .map_err(|e| e.context(format!("{}: key {:?}", self.name, key)))?;
            }
        }

        Ok(report)
    }

    async fn insert_chunk(
        &self,
        key: &K,
        count: u64,
        report: &mut FlushReport,
    ) -> ViewCounterResult<()> {
        if count == 0 {
            self.metrics.record_zero_skipped();
            report.skipped_zero += 1;
            return Ok(());
        }

        debug!("Inserting {} views into key {:?}", count, key);
        // Attributed to the week in effect now, not when the views happened.
        let parity = Parity::of_week(self.clock.iso_week());
        let delta = ViewDelta::for_week(count, parity);

        match self.sink.add_views(key, delta).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(key = ?key, "entity gone, dropping {} views", count);
                self.metrics.record_entity_missing();
                report.entities_missing += 1;
                return Ok(());
            }
            Err(e) => {
                warn!(key = ?key, views = count, error = %e, "view batch lost");
                self.metrics.record_flush_failure(count);
                return Err(e);
            }
        }

        self.metrics.record_flushed(count);
        report.keys_flushed += 1;
        report.views_flushed += count;

        if let Some(cache) = &self.cache {
            match cache.try_get_for_update(key).await {
                Some(handle) => {
                    handle.add(count);
                    self.metrics.record_cache_update();
                }
                None => self.metrics.record_cache_miss(),
            }
        }

        Ok(())
    }
}
