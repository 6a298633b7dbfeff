use crate::sharded_counter::ShardedCounter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Metrics for the view counter: hot-path bumps, flushes and rollovers.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    /// Total number of bumps (sharded, written on every view)
    pub bumps: ShardedCounter,
    /// Buckets created by a first bump
    pub keys_created: AtomicU64,
    /// Views handed to the persistence sink
    pub views_flushed: AtomicU64,
    /// Persistence commands that succeeded
    pub batches_flushed: AtomicU64,
    /// Drained buckets that held no views
    pub zero_batches_skipped: AtomicU64,
    /// Persistence commands that failed (views lost)
    pub flush_failures: AtomicU64,
    /// Views lost to failed persistence commands
    pub views_lost: AtomicU64,
    /// Flushes for entities that no longer exist
    pub entities_missing: AtomicU64,
    /// Cached entities updated after a flush
    pub cache_updates: AtomicU64,
    /// Flushed entities that were not cached
    pub cache_misses: AtomicU64,
    /// Single-column weekly resets
    pub rollovers: AtomicU64,
    /// Both-column resets after long downtime
    pub full_resets: AtomicU64,
    /// Failed rollover attempts (reset or bookmark write)
    pub rollover_failures: AtomicU64,
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub bumps: u64,
    pub keys_created: u64,
    pub views_flushed: u64,
    pub batches_flushed: u64,
    pub zero_batches_skipped: u64,
    pub flush_failures: u64,
    pub views_lost: u64,
    pub entities_missing: u64,
    pub cache_updates: u64,
    pub cache_misses: u64,
    pub rollovers: u64,
    pub full_resets: u64,
    pub rollover_failures: u64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_bump(&self, created: bool) {
        self.bumps.increment();
        if created {
            self.keys_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_flushed(&self, views: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.views_flushed.fetch_add(views, Ordering::Relaxed);
    }

    pub fn record_zero_skipped(&self) {
        self.zero_batches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self, views: u64) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        self.views_lost.fetch_add(views, Ordering::Relaxed);
    }

    pub fn record_entity_missing(&self) {
        self.entities_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_update(&self) {
        self.cache_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollover(&self) {
        self.rollovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_reset(&self) {
        self.full_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollover_failure(&self) {
        self.rollover_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Views bumped but not yet handed to the sink (or lost).
    pub fn views_pending(&self) -> u64 {
        let s = self.snapshot();
        s.bumps.saturating_sub(s.views_flushed + s.views_lost)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bumps: self.bumps.sum(),
            keys_created: self.keys_created.load(Ordering::Relaxed),
            views_flushed: self.views_flushed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            zero_batches_skipped: self.zero_batches_skipped.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            views_lost: self.views_lost.load(Ordering::Relaxed),
            entities_missing: self.entities_missing.load(Ordering::Relaxed),
            cache_updates: self.cache_updates.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rollovers: self.rollovers.load(Ordering::Relaxed),
            full_resets: self.full_resets.load(Ordering::Relaxed),
            rollover_failures: self.rollover_failures.load(Ordering::Relaxed),
        }
    }

    /// Log a summary of counter metrics
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            operation = "counter_metrics_summary",
            bumps = s.bumps,
            keys_created = s.keys_created,
            views_flushed = s.views_flushed,
            batches_flushed = s.batches_flushed,
            flush_failures = s.flush_failures,
            views_lost = s.views_lost,
            entities_missing = s.entities_missing,
            cache_updates = s.cache_updates,
            cache_misses = s.cache_misses,
            rollovers = s.rollovers,
            full_resets = s.full_resets,
            rollover_failures = s.rollover_failures,
        );
    }
}

/// Metrics for scheduled tasks
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub runs: AtomicU64,
    pub failures: AtomicU64,
    pub total_latency_ns: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, task: &str, latency: Duration, ok: bool) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            task_op = "run",
            task = task,
            ok = ok,
            latency_ms = latency.as_millis() as u64
        );
    }

    /// Calculate average task latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.runs.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "scheduler_metrics_summary",
            runs = self.runs.load(Ordering::Relaxed),
            failures = self.failures.load(Ordering::Relaxed),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// Combined metrics for the entire system
pub struct Metrics {
    pub counter: Arc<CounterMetrics>,
    pub scheduler: Arc<SchedulerMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(CounterMetrics::new()),
            scheduler: Arc::new(SchedulerMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "=== view-counter Metrics Summary ==="
        );
        self.counter.log_summary();
        self.scheduler.log_summary();
    }

    /// Create a periodic logging background task
    pub fn spawn_periodic_logging(
        self: &Arc<Self>,
        interval_secs: u64,
        stop: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if stop.load(Ordering::Relaxed) {
                    break;
                }

                metrics.counter.log_summary();
                metrics.scheduler.log_summary();
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
