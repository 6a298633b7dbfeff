use super::traits::{MetaStore, PersistenceSink, ViewDelta};
use crate::counter::ShardKey;
use crate::error::{ViewCounterError, ViewCounterResult};
use crate::week::Parity;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Persisted view totals for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewAggregate {
    pub total_views: u64,
    pub week_even_views: u64,
    pub week_odd_views: u64,
}

/// In-process meta store.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    values: DashMap<String, String>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, key: &str) -> ViewCounterResult<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> ViewCounterResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// In-process persistence sink holding one [`ViewAggregate`] per entity.
///
/// By default rows are created on first write. A sink built with
/// [`MemorySink::with_entities`] only accepts known entities and reports
/// `NotFound` for anything else, like an `UPDATE` against a deleted row.
#[derive(Debug)]
pub struct MemorySink<K: ShardKey> {
    rows: DashMap<K, ViewAggregate>,
    create_missing: bool,
    add_calls: AtomicU64,
    reset_calls: AtomicU64,
}

impl<K: ShardKey> MemorySink<K> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            create_missing: true,
            add_calls: AtomicU64::new(0),
            reset_calls: AtomicU64::new(0),
        }
    }

    pub fn with_entities(keys: impl IntoIterator<Item = K>) -> Self {
        let sink = Self {
            create_missing: false,
            ..Self::new()
        };
        for key in keys {
            sink.rows.insert(key, ViewAggregate::default());
        }
        sink
    }

    pub fn aggregate(&self, key: &K) -> Option<ViewAggregate> {
        self.rows.get(key).map(|row| *row.value())
    }

    /// Number of `add_views` commands received, including rejected ones.
    pub fn add_calls(&self) -> u64 {
        self.add_calls.load(Ordering::Relaxed)
    }

    /// Number of weekly reset commands received.
    pub fn reset_calls(&self) -> u64 {
        self.reset_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<K: ShardKey> Default for MemorySink<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: ShardKey> PersistenceSink<K> for MemorySink<K> {
    async fn add_views(&self, key: &K, delta: ViewDelta) -> ViewCounterResult<()> {
        self.add_calls.fetch_add(1, Ordering::Relaxed);

        let mut row = if self.create_missing {
            self.rows.entry(key.clone()).or_default()
        } else {
            match self.rows.get_mut(key) {
                Some(row) => row,
                None => return Err(ViewCounterError::NotFound(format!("entity {:?}", key))),
            }
        };
        row.total_views += delta.total;
        row.week_even_views += delta.even_week;
        row.week_odd_views += delta.odd_week;
        trace!(key = ?key, total = row.total_views, "memory sink updated");
        Ok(())
    }

    async fn reset_weekly_column(&self, parity: Parity) -> ViewCounterResult<()> {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
        for mut row in self.rows.iter_mut() {
            match parity {
                Parity::Even => row.week_even_views = 0,
                Parity::Odd => row.week_odd_views = 0,
            }
        }
        Ok(())
    }

    async fn reset_both_weekly_columns(&self) -> ViewCounterResult<()> {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
        for mut row in self.rows.iter_mut() {
            row.week_even_views = 0;
            row.week_odd_views = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_meta_store_get_set() {
        let meta = MemoryMetaStore::new();
        assert_eq!(meta.get("magic").await.unwrap(), None);

        meta.set("magic", "lol").await.unwrap();
        assert_eq!(meta.get("magic").await.unwrap().as_deref(), Some("lol"));

        meta.set("magic", "wha").await.unwrap();
        assert_eq!(meta.get("magic").await.unwrap().as_deref(), Some("wha"));
        assert_eq!(meta.get("giggle").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sink_accumulates_deltas() {
        let sink = MemorySink::<u64>::new();
        sink.add_views(&4, ViewDelta::for_week(5, Parity::Even))
            .await
            .unwrap();
        sink.add_views(&4, ViewDelta::for_week(2, Parity::Odd))
            .await
            .unwrap();

        assert_eq!(
            sink.aggregate(&4),
            Some(ViewAggregate {
                total_views: 7,
                week_even_views: 5,
                week_odd_views: 2,
            })
        );
        assert_eq!(sink.add_calls(), 2);
    }

    #[tokio::test]
    async fn test_strict_sink_rejects_unknown_entity() {
        let sink = MemorySink::with_entities([1u64, 2]);
        let err = sink
            .add_views(&3, ViewDelta::for_week(1, Parity::Odd))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(sink.aggregate(&3), None);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_columns() {
        let sink = MemorySink::<u64>::new();
        sink.add_views(&1, ViewDelta::for_week(3, Parity::Even))
            .await
            .unwrap();
        sink.add_views(&1, ViewDelta::for_week(4, Parity::Odd))
            .await
            .unwrap();

        sink.reset_weekly_column(Parity::Even).await.unwrap();
        let row = sink.aggregate(&1).unwrap();
        assert_eq!(row.week_even_views, 0);
        assert_eq!(row.week_odd_views, 4);
        assert_eq!(row.total_views, 7);

        sink.reset_both_weekly_columns().await.unwrap();
        let row = sink.aggregate(&1).unwrap();
        assert_eq!(row.week_odd_views, 0);
        assert_eq!(row.total_views, 7);
        assert_eq!(sink.reset_calls(), 2);
    }
}
