//! Schedules and time-bound windows.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A day/time window, optionally bounded by calendar dates.
///
/// `end_time < start_time` denotes an overnight window wrapping past
/// midnight (e.g. 22:00-02:00). Date bounds are inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    /// Days of week on which the window *starts*.
    pub days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl ScheduleWindow {
    /// Whether this window wraps past midnight.
    pub fn is_overnight(&self) -> bool {
        self.end_time < self.start_time
    }

    /// Width of the calendar-date range in days, used as the specificity
    /// tie-break (narrower wins). Unbounded ranges are least specific.
    pub fn date_range_days(&self) -> i64 {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (end - start).num_days() + 1,
            _ => i64::MAX,
        }
    }
}

/// A single time-bound content rule inside a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub content: super::ContentRef,
    #[serde(flatten)]
    pub window: ScheduleWindow,
    /// Higher wins among simultaneously active entries.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// A named container of schedule entries, assignable to a device or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub entries: Vec<ScheduleEntry>,
}
