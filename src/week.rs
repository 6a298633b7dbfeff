//! ISO-week rollover of the weekly view columns.
//!
//! Each entity carries two weekly columns, one for even ISO weeks and one for
//! odd ones. When the week changes, the column belonging to the parity that
//! just became inactive is zeroed; the column for the now-current parity is
//! left alone so flushes landing right at the boundary are kept.
//!
//! The last observed state is stored in the meta store as
//! `"<unixtime>-<week>"` so that a restart neither repeats nor skips a reset.

use crate::clock::{iso_week, Clock};
use crate::counter::ShardKey;
use crate::error::{ViewCounterError, ViewCounterResult};
use crate::metrics::CounterMetrics;
use crate::store::{MetaStore, PersistenceSink};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Meta store key of the rollover bookmark.
pub const DEFAULT_BOOKMARK_KEY: &str = "lastWeekReset";

/// Downtime after which both weekly columns are stale.
pub const FULL_RESET_AFTER_SECS: i64 = 7 * 24 * 60 * 60;

/// Parity of an ISO week number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of_week(week: u32) -> Self {
        if week % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn other(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }
}

/// Persisted rollover state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookmark {
    pub unix_time: i64,
    pub week: u32,
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.unix_time, self.week)
    }
}

impl FromStr for Bookmark {
    type Err = ViewCounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ViewCounterError::ParseError(format!("malformed week bookmark {:?}", s));

        let (time, week) = s.trim().rsplit_once('-').ok_or_else(malformed)?;
        let unix_time = time.parse::<i64>().map_err(|_| malformed())?;
        let week = week.parse::<u32>().map_err(|_| malformed())?;
        if unix_time < 0 || !(1..=53).contains(&week) {
            return Err(malformed());
        }

        Ok(Self { unix_time, week })
    }
}

/// In-memory rollover state. `current_week` is 0 until the first bookmark
/// load or tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekState {
    pub current_week: u32,
    pub last_reset_unix: Option<i64>,
}

/// Tracks the current ISO week and resets the stale weekly column on change.
pub struct WeekRollover<K: ShardKey> {
    // Held for the whole of init/tick so transitions never interleave.
    state: Mutex<WeekState>,
    sink: Arc<dyn PersistenceSink<K>>,
    meta: Arc<dyn MetaStore>,
    clock: Arc<dyn Clock>,
    bookmark_key: String,
    metrics: Arc<CounterMetrics>,
}

impl<K: ShardKey> WeekRollover<K> {
    pub fn new(
        sink: Arc<dyn PersistenceSink<K>>,
        meta: Arc<dyn MetaStore>,
        clock: Arc<dyn Clock>,
        bookmark_key: impl Into<String>,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(WeekState::default()),
            sink,
            meta,
            clock,
            bookmark_key: bookmark_key.into(),
            metrics,
        }
    }

    pub async fn state(&self) -> WeekState {
        *self.state.lock().await
    }

    pub async fn current_week(&self) -> u32 {
        self.state.lock().await.current_week
    }

    /// Restore the tracked week from the bookmark.
    ///
    /// A missing or malformed bookmark leaves the week at 0 so the first tick
    /// performs a normal rollover. If the bookmark is at least a week old both
    /// weekly columns are reset, since the process was down across a boundary.
    pub async fn init(&self) -> ViewCounterResult<()> {
        let mut state = self.state.lock().await;

        let raw = match self.meta.get(&self.bookmark_key).await? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => {
                debug!(key = %self.bookmark_key, "no week bookmark, starting fresh");
                return Ok(());
            }
        };

        let bookmark = match raw.parse::<Bookmark>() {
            Ok(bookmark) => bookmark,
            Err(e) => {
                warn!(key = %self.bookmark_key, error = %e, "ignoring week bookmark");
                return Ok(());
            }
        };

        state.current_week = bookmark.week;
        state.last_reset_unix = Some(bookmark.unix_time);

        // A bookmark from the future yields a negative elapsed time, so no reset.
        let elapsed = self
            .clock
            .now()
            .timestamp()
            .saturating_sub(bookmark.unix_time);
        if elapsed >= FULL_RESET_AFTER_SECS {
            info!(
                operation = "week_reset",
                elapsed_secs = elapsed,
                week = bookmark.week,
                "bookmark older than a week, resetting both weekly columns"
            );
            if let Err(e) = self.sink.reset_both_weekly_columns().await {
                self.metrics.record_rollover_failure();
                return Err(ViewCounterError::Rollover(format!(
                    "resetting both weekly columns: {}",
                    e
                )));
            }
            self.metrics.record_full_reset();
        } else {
            debug!(week = bookmark.week, elapsed_secs = elapsed, "week bookmark restored");
        }

        Ok(())
    }

    /// Check for an ISO-week change and roll over if needed.
    ///
    /// Returns true when a transition was applied. On failure the tracked week
    /// is left as it was, so the next tick retries the same transition.
    pub async fn tick(&self) -> ViewCounterResult<bool> {
        let mut state = self.state.lock().await;

        let now = self.clock.now();
        let week = iso_week(&now);
        let changed = week != state.current_week;

        if changed {
            let stale = Parity::of_week(week).other();
            if let Err(e) = self.sink.reset_weekly_column(stale).await {
                self.metrics.record_rollover_failure();
                return Err(ViewCounterError::Rollover(format!(
                    "resetting {} week column for week {}: {}",
                    stale, week, e
                )));
            }
        }

        let bookmark = Bookmark {
            unix_time: now.timestamp(),
            week,
        };
        if let Err(e) = self
            .meta
            .set(&self.bookmark_key, &bookmark.to_string())
            .await
        {
            self.metrics.record_rollover_failure();
            return Err(ViewCounterError::Rollover(format!(
                "writing week bookmark: {}",
                e
            )));
        }

        if changed {
            info!(
                operation = "week_rollover",
                from = state.current_week,
                to = week,
                "weekly views rolled over"
            );
            state.current_week = week;
            self.metrics.record_rollover();
        }
        state.last_reset_unix = Some(bookmark.unix_time);

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryMetaStore, MemorySink, MockMetaStore, ViewDelta};
    use chrono::{Duration, TimeZone, Utc};

    // Monday of ISO week 10, 2024.
    fn week_10() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    struct Fixture {
        sink: Arc<MemorySink<u64>>,
        meta: Arc<MemoryMetaStore>,
        clock: Arc<ManualClock>,
        metrics: Arc<CounterMetrics>,
        rollover: WeekRollover<u64>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let meta = Arc::new(MemoryMetaStore::new());
        let clock = Arc::new(ManualClock::new(week_10()));
        let metrics = Arc::new(CounterMetrics::new());
        let rollover = WeekRollover::new(
            sink.clone(),
            meta.clone(),
            clock.clone(),
            DEFAULT_BOOKMARK_KEY,
            metrics.clone(),
        );
        Fixture {
            sink,
            meta,
            clock,
            metrics,
            rollover,
        }
    }

    #[test]
    fn test_bookmark_round_trip() {
        let bookmark: Bookmark = "1709553600-10".parse().unwrap();
        assert_eq!(
            bookmark,
            Bookmark {
                unix_time: 1709553600,
                week: 10
            }
        );
        assert_eq!(bookmark.to_string(), "1709553600-10");
    }

    #[rstest::rstest]
    #[case("")]
    #[case("1709553600")]
    #[case("abc-10")]
    #[case("1709553600-x")]
    #[case("1709553600-0")]
    #[case("1709553600-54")]
    #[case("-1-10")]
    #[case("-9223372036854775808-10")]
    fn test_bookmark_rejects_malformed(#[case] raw: &str) {
        assert!(raw.parse::<Bookmark>().is_err());
    }

    #[test]
    fn test_parity() {
        assert_eq!(Parity::of_week(10), Parity::Even);
        assert_eq!(Parity::of_week(11), Parity::Odd);
        assert_eq!(Parity::Even.other(), Parity::Odd);
        assert_eq!(Parity::Odd.to_string(), "odd");
    }

    #[tokio::test]
    async fn test_init_without_bookmark() {
        let f = fixture();
        f.rollover.init().await.unwrap();
        assert_eq!(f.rollover.current_week().await, 0);
        assert_eq!(f.sink.reset_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_with_malformed_bookmark() {
        let f = fixture();
        f.meta
            .set(DEFAULT_BOOKMARK_KEY, "garbage")
            .await
            .unwrap();

        f.rollover.init().await.unwrap();
        assert_eq!(f.rollover.state().await, WeekState::default());
        assert_eq!(f.sink.reset_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_with_out_of_range_timestamps() {
        let f = fixture();
        f.meta
            .set(DEFAULT_BOOKMARK_KEY, "-9223372036854775808-10")
            .await
            .unwrap();
        f.rollover.init().await.unwrap();
        assert_eq!(f.rollover.state().await, WeekState::default());

        f.meta
            .set(DEFAULT_BOOKMARK_KEY, &format!("{}-10", i64::MAX))
            .await
            .unwrap();
        f.rollover.init().await.unwrap();
        assert_eq!(f.rollover.current_week().await, 10);
        assert_eq!(f.sink.reset_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_recent_bookmark_restores_week() {
        let f = fixture();
        let then = week_10() - Duration::days(2);
        f.meta
            .set(DEFAULT_BOOKMARK_KEY, &format!("{}-9", then.timestamp()))
            .await
            .unwrap();

        f.rollover.init().await.unwrap();
        let state = f.rollover.state().await;
        assert_eq!(state.current_week, 9);
        assert_eq!(state.last_reset_unix, Some(then.timestamp()));
        assert_eq!(f.sink.reset_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_stale_bookmark_resets_both_columns() {
        let f = fixture();
        f.sink
            .add_views(&1, ViewDelta::for_week(3, Parity::Even))
            .await
            .unwrap();
        f.sink
            .add_views(&1, ViewDelta::for_week(4, Parity::Odd))
            .await
            .unwrap();

        let then = week_10() - Duration::days(8);
        f.meta
            .set(DEFAULT_BOOKMARK_KEY, &format!("{}-8", then.timestamp()))
            .await
            .unwrap();

        f.rollover.init().await.unwrap();

        assert_eq!(f.sink.reset_calls(), 1);
        let row = f.sink.aggregate(&1).unwrap();
        assert_eq!(row.week_even_views, 0);
        assert_eq!(row.week_odd_views, 0);
        assert_eq!(row.total_views, 7);
        assert_eq!(f.rollover.current_week().await, 8);
        assert_eq!(f.metrics.snapshot().full_resets, 1);
    }

    #[tokio::test]
    async fn test_tick_rolls_even_to_odd() {
        let f = fixture();
        f.rollover.tick().await.unwrap();
        assert_eq!(f.rollover.current_week().await, 10);

        f.sink
            .add_views(&2, ViewDelta::for_week(6, Parity::Even))
            .await
            .unwrap();
        f.sink
            .add_views(&2, ViewDelta::for_week(1, Parity::Odd))
            .await
            .unwrap();
        let resets_before = f.sink.reset_calls();

        f.clock.advance(Duration::days(7));
        assert!(f.rollover.tick().await.unwrap());

        assert_eq!(f.sink.reset_calls(), resets_before + 1);
        let row = f.sink.aggregate(&2).unwrap();
        assert_eq!(row.week_even_views, 0, "even column belongs to the week that ended");
        assert_eq!(row.week_odd_views, 1);
        assert_eq!(f.rollover.current_week().await, 11);

        let stored = f.meta.get(DEFAULT_BOOKMARK_KEY).await.unwrap().unwrap();
        let bookmark: Bookmark = stored.parse().unwrap();
        assert_eq!(bookmark.week, 11);
        assert_eq!(bookmark.unix_time, f.clock.now().timestamp());
    }

    #[tokio::test]
    async fn test_tick_same_week_refreshes_bookmark_only() {
        let f = fixture();
        f.rollover.tick().await.unwrap();
        let resets = f.sink.reset_calls();

        f.clock.advance(Duration::minutes(15));
        assert!(!f.rollover.tick().await.unwrap());

        assert_eq!(f.sink.reset_calls(), resets);
        let stored = f.meta.get(DEFAULT_BOOKMARK_KEY).await.unwrap().unwrap();
        assert_eq!(
            stored,
            format!("{}-10", f.clock.now().timestamp())
        );
    }

    #[tokio::test]
    async fn test_bookmark_write_failure_does_not_advance_week() {
        let sink = Arc::new(MemorySink::<u64>::new());
        let clock = Arc::new(ManualClock::new(week_10()));
        let metrics = Arc::new(CounterMetrics::new());

        let mut meta = MockMetaStore::new();
        meta.expect_set()
            .times(1)
            .returning(|_, _| Err(ViewCounterError::MetaStore("read-only".to_string())));

        let rollover = WeekRollover::new(
            sink.clone(),
            Arc::new(meta),
            clock,
            DEFAULT_BOOKMARK_KEY,
            metrics.clone(),
        );

        let err = rollover.tick().await.unwrap_err();
        assert!(matches!(err, ViewCounterError::Rollover(_)));
        assert_eq!(rollover.current_week().await, 0);
        assert_eq!(metrics.snapshot().rollover_failures, 1);
    }

    #[tokio::test]
    async fn test_meta_read_failure_fails_init() {
        let mut meta = MockMetaStore::new();
        meta.expect_get()
            .returning(|_| Err(ViewCounterError::MetaStore("connection refused".to_string())));

        let rollover = WeekRollover::<u64>::new(
            Arc::new(MemorySink::<u64>::new()),
            Arc::new(meta),
            Arc::new(ManualClock::new(week_10())),
            DEFAULT_BOOKMARK_KEY,
            Arc::new(CounterMetrics::new()),
        );

        assert!(rollover.init().await.is_err());
    }
}
