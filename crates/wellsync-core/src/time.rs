//! Time types for calendar reads.
//!
//! This module provides [`EventTime`] for event boundaries (either a
//! specific instant or an all-day date), [`DayWindow`] for the inclusive
//! range of local days a calendar view covers, and [`TimeWindow`] for the
//! UTC query bounds sent to providers.
//!
//! All local-day arithmetic uses a [`FixedOffset`]; callers resolve their
//! preferred timezone to an offset once and pass it down.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Represents the start or end of a calendar event.
///
/// - **DateTime**: a specific point in time, stored as UTC
/// - **AllDay**: a calendar date without a time of day
///
/// For all-day events the end date follows the exclusive convention used by
/// calendar providers: a one-day event on the 5th ends on the 6th.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date.
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Returns the date if this is an `AllDay` variant.
    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Self::AllDay(d) => Some(d),
            Self::DateTime(_) => None,
        }
    }

    /// Returns the calendar day this time falls on, as seen at `offset`.
    pub fn local_date(&self, offset: &FixedOffset) -> NaiveDate {
        match self {
            Self::DateTime(dt) => dt.with_timezone(offset).date_naive(),
            Self::AllDay(date) => *date,
        }
    }

    /// Returns the wall-clock time at `offset`, or `None` for all-day times.
    pub fn local_time(&self, offset: &FixedOffset) -> Option<NaiveTime> {
        self.as_datetime()
            .map(|dt| dt.with_timezone(offset).time())
    }
}

/// An inclusive range of calendar days, `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    /// First day of the window (inclusive).
    pub start: NaiveDate,
    /// Last day of the window (inclusive).
    pub end: NaiveDate,
}

impl DayWindow {
    /// Creates a window, or `None` if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a window covering a single day.
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Checks if a date falls within this window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Returns the number of days covered.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Intersects an inclusive date range with this window.
    ///
    /// Returns `None` when the two ranges do not overlap.
    pub fn clip(&self, first: NaiveDate, last: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let from = first.max(self.start);
        let to = last.min(self.end);
        (from <= to).then_some((from, to))
    }

    /// Converts the window into UTC query bounds at the given offset.
    ///
    /// The result starts at local midnight of `start` and ends at local
    /// midnight following `end`.
    pub fn to_time_window(&self, offset: &FixedOffset) -> TimeWindow {
        TimeWindow {
            start: start_of_day(self.start, offset),
            end: start_of_day(self.end + Duration::days(1), offset),
        }
    }
}

/// A time window for querying calendar events.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }
}

/// Returns the UTC instant of local midnight on `date` at `offset`.
pub fn start_of_day(date: NaiveDate, offset: &FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN).and_utc();
    local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()))
}

/// Returns the current local UTC offset of the host.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}
