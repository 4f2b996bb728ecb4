//! Wall-clock access and lab-local time conversion

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc};

use crate::time_window::TimeOfDay;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a settable instant
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The wall-clock offset of the building the labs are in
///
/// Reservation dates are calendar dates of the room, never UTC days.
#[derive(Debug, Clone, Copy)]
pub struct LabTimezone {
    offset: FixedOffset,
}

impl LabTimezone {
    /// Build from an offset east of UTC in minutes (Santiago summer time is -180)
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes * 60).map(|offset| Self { offset })
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of an instant in the lab
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Wall-clock minute of an instant in the lab, seconds truncated
    pub fn time_of(&self, at: DateTime<Utc>) -> TimeOfDay {
        let local = at.with_timezone(&self.offset);
        TimeOfDay::from_clock(local.hour(), local.minute())
    }

    /// UTC instant at which a lab-local calendar day starts
    pub fn day_start_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc)
            - Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }

    /// UTC bounds `[from 00:00, (to + 1) 00:00)` of an inclusive local date range
    pub fn range_utc(&self, from: NaiveDate, to: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = to.succ_opt().unwrap_or(to);
        (self.day_start_utc(from), self.day_start_utc(end))
    }
}
