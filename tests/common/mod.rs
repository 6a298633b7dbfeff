//! Shared fakes for view-counter integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use view_counter::clock::ManualClock;
use view_counter::error::{ViewCounterError, ViewCounterResult};
use view_counter::store::{PersistenceSink, ViewDelta};
use view_counter::week::Parity;

/// One command received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    AddViews(u64, ViewDelta),
    ResetColumn(Parity),
    ResetBoth,
}

/// Sink that records every command and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    pub fail_adds: AtomicBool,
    pub fail_resets: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn adds(&self) -> Vec<(u64, ViewDelta)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::AddViews(k, d) => Some((k, d)),
                _ => None,
            })
            .collect()
    }

    pub fn resets(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, SinkCall::AddViews(..)))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PersistenceSink<u64> for RecordingSink {
    async fn add_views(&self, key: &u64, delta: ViewDelta) -> ViewCounterResult<()> {
        self.record(SinkCall::AddViews(*key, delta));
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(ViewCounterError::Persistence("write timeout".to_string()));
        }
        Ok(())
    }

    async fn reset_weekly_column(&self, parity: Parity) -> ViewCounterResult<()> {
        self.record(SinkCall::ResetColumn(parity));
        if self.fail_resets.load(Ordering::SeqCst) {
            return Err(ViewCounterError::Persistence("table locked".to_string()));
        }
        Ok(())
    }

    async fn reset_both_weekly_columns(&self) -> ViewCounterResult<()> {
        self.record(SinkCall::ResetBoth);
        if self.fail_resets.load(Ordering::SeqCst) {
            return Err(ViewCounterError::Persistence("table locked".to_string()));
        }
        Ok(())
    }
}

/// Wednesday of ISO week 10, 2024.
pub fn even_week() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
}

/// Wednesday of ISO week 11, 2024.
pub fn odd_week() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 13, 10, 0, 0).unwrap()
}

pub fn clock_at(at: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at))
}
