//! Wall-clock access for flush attribution and week rollover.
//!
//! Week numbers follow ISO-8601 (Monday start, weeks 1..=53) and are computed
//! in UTC so that every process sharing a backing store agrees on the boundary.

use chrono::{DateTime, Datelike, Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// ISO week number of `now()`.
    fn iso_week(&self) -> u32 {
        iso_week(&self.now())
    }
}

/// ISO-8601 week number of the given instant.
pub fn iso_week(at: &DateTime<Utc>) -> u32 {
    at.iso_week().week()
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to force week boundaries.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso_week_boundaries() {
        // 2024-01-01 is a Monday and starts ISO week 1.
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(iso_week(&monday), 1);

        // Sunday 2023-12-31 still belongs to week 52 of 2023.
        let sunday = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(iso_week(&sunday), 52);

        // 2020 has 53 ISO weeks.
        let last = Utc.with_ymd_and_hms(2020, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(iso_week(&last), 53);
    }

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.iso_week(), 10);

        clock.advance(Duration::days(7));
        assert_eq!(clock.iso_week(), 11);
        assert_eq!(clock.now(), start + Duration::days(7));
    }
}
