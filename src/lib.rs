pub mod cache;
pub mod clock;
pub mod config;
pub mod counter;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod scheduler;
pub mod sharded_counter;
pub mod store;
pub mod week;

pub use cache::ViewCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CliArgs, Config};
pub use counter::{Collaborators, ShardKey, ViewCounter};
pub use error::{ViewCounterError, ViewCounterResult};
pub use flush::FlushReport;
pub use metrics::Metrics;
pub use scheduler::{IntervalClass, Scheduler};
pub use sharded_counter::ShardedCounter;

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use store::{JsonFileMetaStore, MemorySink};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, trace, warn};

/// Run the topic view counter daemon.
///
/// Each line of `input` is one view of the topic ID it contains. Views are
/// flushed into an in-memory sink on the configured schedule; the week
/// bookmark is kept in the JSON meta file. Returns after `input` is exhausted
/// or Ctrl-C, once the shutdown flush has run.
pub async fn run<R>(config: Config, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    info!(operation = "startup", message = "view-counter starting");
    debug!(config = ?config, "Configuration loaded");

    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(MemorySink::<u64>::new());
    let cache = Arc::new(ViewCache::<u64>::new(
        config.cache.max_entries,
        Duration::from_secs(config.cache.ttl_secs),
    ));

    // Cached totals are only kept current when flushes push into them.
    let reader = config
        .counter
        .update_cache
        .then(|| TopicReader::new(Arc::clone(&sink), Arc::clone(&cache)));

    let collaborators = Collaborators {
        sink: sink.clone(),
        meta: Arc::new(JsonFileMetaStore::new(&config.meta.path)),
        cache: Some(cache as Arc<dyn store::EntityCache<u64>>),
        clock: Arc::new(SystemClock),
    };

    let counter = ViewCounter::start(
        "topic_views",
        collaborators,
        &config.counter,
        &config.meta.bookmark_key,
        Arc::clone(&metrics.counter),
    )
    .await
    .context("Failed to start topic view counter")?;

    let mut scheduler = Scheduler::new(Arc::clone(&metrics.scheduler));
    counter.register(&mut scheduler);

    let stop = Arc::new(AtomicBool::new(false));
    let metrics_task = config
        .logging
        .metrics_enabled
        .then(|| metrics.spawn_periodic_logging(config.logging.metrics_interval_secs, stop.clone()));

    let views = {
        let counter = Arc::clone(&counter);
        async move {
            if let Err(e) = read_views(&counter, reader.as_ref(), input).await {
                warn!(error = %e, "stopped reading views");
            }
        }
    };

    let failures = scheduler
        .run_until(async {
            tokio::select! {
                _ = views => info!("input closed"),
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        })
        .await;

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    if let Some(task) = metrics_task {
        task.abort();
    }

    info!(
        entities = sink.len(),
        pending = counter.pending_keys(),
        "view-counter stopped"
    );
    metrics.log_full_summary();

    if let Some(failure) = failures.into_iter().next() {
        return Err(failure.error).context(format!("shutdown task {} failed", failure.task));
    }
    Ok(())
}

/// Read side of the daemon: a topic view loads the topic's total through the
/// entity cache, falling back to the sink on a miss.
pub struct TopicReader {
    sink: Arc<MemorySink<u64>>,
    cache: Arc<ViewCache<u64>>,
}

impl TopicReader {
    pub fn new(sink: Arc<MemorySink<u64>>, cache: Arc<ViewCache<u64>>) -> Self {
        Self { sink, cache }
    }

    /// Persisted total views of `id` as a reader sees them.
    pub async fn view_count(&self, id: u64) -> u64 {
        let sink = Arc::clone(&self.sink);
        self.cache
            .get_or_load(id, async move {
                sink.aggregate(&id).map(|row| row.total_views).unwrap_or(0)
            })
            .await
    }
}

/// Bump one view per line of `input`. Returns the number of views recorded.
///
/// With a `reader`, each view first loads the topic into the cache the way a
/// page render would, so later flushes update the cached total.
pub async fn read_views<R>(
    counter: &ViewCounter<u64>,
    reader: Option<&TopicReader>,
    input: R,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut views = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<u64>() {
            Ok(id) => {
                if let Some(reader) = reader {
                    let total = reader.view_count(id).await;
                    trace!(topic = id, total, "topic loaded");
                }
                counter.bump(id);
                views += 1;
            }
            Err(_) => warn!(line = line, "ignoring line that is not a topic ID"),
        }
    }
    Ok(views)
}
