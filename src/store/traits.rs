use crate::cache::ViewHandle;
use crate::counter::ShardKey;
use crate::error::ViewCounterResult;
use crate::week::Parity;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable string key/value store. Only the rollover bookmark lives here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Returns `Ok(None)` when the key has never been set.
    async fn get(&self, key: &str) -> ViewCounterResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> ViewCounterResult<()>;
}

/// Additive update for one entity's persisted view aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewDelta {
    pub total: u64,
    pub even_week: u64,
    pub odd_week: u64,
}

impl ViewDelta {
    /// Attribute `count` views to the week bucket matching `parity`.
    pub fn for_week(count: u64, parity: Parity) -> Self {
        match parity {
            Parity::Even => Self {
                total: count,
                even_week: count,
                odd_week: 0,
            },
            Parity::Odd => Self {
                total: count,
                even_week: 0,
                odd_week: count,
            },
        }
    }
}

/// Backing store for persisted view aggregates.
#[async_trait]
pub trait PersistenceSink<K: ShardKey>: Send + Sync {
    /// Add `delta` to the entity's totals. Returns `NotFound` if the entity
    /// no longer exists.
    async fn add_views(&self, key: &K, delta: ViewDelta) -> ViewCounterResult<()>;

    /// Zero the weekly column for `parity` on every entity.
    async fn reset_weekly_column(&self, parity: Parity) -> ViewCounterResult<()>;

    /// Zero both weekly columns on every entity.
    async fn reset_both_weekly_columns(&self) -> ViewCounterResult<()>;
}

/// Best-effort in-memory view of entities that readers consult instead of
/// querying storage.
#[async_trait]
pub trait EntityCache<K: ShardKey>: Send + Sync {
    /// Handle for an atomic update of the cached entity, if it is cached.
    async fn try_get_for_update(&self, key: &K) -> Option<Arc<ViewHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_even_week() {
        let delta = ViewDelta::for_week(5, Parity::Even);
        assert_eq!(
            delta,
            ViewDelta {
                total: 5,
                even_week: 5,
                odd_week: 0
            }
        );
    }

    #[test]
    fn test_delta_odd_week() {
        let delta = ViewDelta::for_week(3, Parity::Odd);
        assert_eq!(delta.total, 3);
        assert_eq!(delta.even_week, 0);
        assert_eq!(delta.odd_week, 3);
    }
}
