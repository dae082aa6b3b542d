//! Schedule window evaluation.
//!
//! Decides whether a time/day-bound window is active at a given UTC instant
//! in a device's IANA timezone. Pure functions, no I/O; safe to call every
//! few seconds.
//!
//! DST policy:
//! - Spring forward: local times inside the skipped hour never occur, so a
//!   window lying entirely inside the gap is inactive for that day and is
//!   logged at `warn` instead of silently matching a neighbouring instant.
//! - Fall back: the repeated hour is evaluated on its first occurrence only,
//!   so a window overlapping it never fires twice.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::domain::ScheduleWindow;

/// Parse an IANA timezone name.
pub fn parse_tz(name: &str) -> crate::Result<Tz> {
    name.parse()
        .map_err(|_| crate::Error::InvalidTimezone(name.to_string()))
}

/// Evaluator for schedule windows.
pub struct WindowEvaluator;

impl WindowEvaluator {
    /// Whether `window` is active at `now_utc` in `tz`.
    pub fn is_active(window: &ScheduleWindow, now_utc: DateTime<Utc>, tz: Tz) -> bool {
        // Zero-length windows can never contain an instant.
        if window.start_time == window.end_time {
            return false;
        }

        let local = now_utc.with_timezone(&tz);

        // Fall-back fold: the same local time occurs twice. Only the first
        // occurrence (the earlier UTC instant) counts.
        if let LocalResult::Ambiguous(_, second) = tz.from_local_datetime(&local.naive_local())
            && now_utc.naive_utc() == second.naive_utc()
        {
            debug!(
                %now_utc,
                tz = %tz,
                "second occurrence of repeated local hour, window treated as inactive"
            );
            return false;
        }

        let today = local.date_naive();
        let time = local.time();

        // Window starting today.
        if window.days.contains(&today.weekday()) && Self::date_in_bounds(window, today) {
            if Self::entirely_in_gap(window, today, tz) {
                warn!(
                    date = %today,
                    start = %window.start_time,
                    end = %window.end_time,
                    tz = %tz,
                    "window lies entirely inside a skipped DST hour, treating as inactive"
                );
            } else {
                let matched = if window.is_overnight() {
                    time >= window.start_time
                } else {
                    time >= window.start_time && time < window.end_time
                };
                if matched {
                    return true;
                }
            }
        }

        // Morning tail of an overnight window that started yesterday.
        if window.is_overnight()
            && let Some(yesterday) = today.pred_opt()
            && window.days.contains(&yesterday.weekday())
            && Self::date_in_bounds(window, yesterday)
            && time < window.end_time
        {
            return true;
        }

        false
    }

    /// Inclusive calendar-date bounds, checked against the window's start
    /// day.
    fn date_in_bounds(window: &ScheduleWindow, start_day: NaiveDate) -> bool {
        if let Some(start) = window.start_date
            && start_day < start
        {
            return false;
        }
        if let Some(end) = window.end_date
            && start_day > end
        {
            return false;
        }
        true
    }

    /// Whether the whole `[start_time, end_time)` range falls inside a
    /// spring-forward gap on `date`. Overnight windows span midnight and can
    /// never fit inside a one-hour gap.
    fn entirely_in_gap(window: &ScheduleWindow, date: NaiveDate, tz: Tz) -> bool {
        if window.is_overnight() {
            return false;
        }
        let start = date.and_time(window.start_time);
        // End is exclusive, so probe the last contained second instead.
        let last = date.and_time(window.end_time) - Duration::seconds(1);
        matches!(tz.from_local_datetime(&start), LocalResult::None)
            && matches!(tz.from_local_datetime(&last), LocalResult::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn window(days: Vec<Weekday>, start: (u32, u32), end: (u32, u32)) -> ScheduleWindow {
        ScheduleWindow {
            days,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            start_date: None,
            end_date: None,
        }
    }

    fn all_days() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
    }

    fn berlin() -> Tz {
        "Europe/Berlin".parse().unwrap()
    }

    #[test]
    fn plain_daytime_window() {
        let w = window(vec![Weekday::Wed], (9, 0), (17, 0));
        // 2025-06-18 is a Wednesday; Berlin is UTC+2 in June.
        let inside = Utc.with_ymd_and_hms(2025, 6, 18, 8, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 6, 18, 6, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 18, 15, 0, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, inside, berlin()));
        assert!(!WindowEvaluator::is_active(&w, before, berlin()));
        // 17:00 local: end is exclusive.
        assert!(!WindowEvaluator::is_active(&w, after, berlin()));
    }

    #[test]
    fn wrong_day_is_inactive() {
        let w = window(vec![Weekday::Mon], (9, 0), (17, 0));
        let wednesday = Utc.with_ymd_and_hms(2025, 6, 18, 8, 0, 0).unwrap();
        assert!(!WindowEvaluator::is_active(&w, wednesday, berlin()));
    }

    #[test]
    fn overnight_window_spans_midnight() {
        // Friday 22:00 -> Saturday 02:00.
        let w = window(vec![Weekday::Fri], (22, 0), (2, 0));
        // 2025-06-20 is a Friday. 23:00 local Friday.
        let evening = Utc.with_ymd_and_hms(2025, 6, 20, 21, 0, 0).unwrap();
        // 01:00 local Saturday: the morning tail.
        let morning = Utc.with_ymd_and_hms(2025, 6, 20, 23, 0, 0).unwrap();
        // 03:00 local Saturday: past the end.
        let late = Utc.with_ymd_and_hms(2025, 6, 21, 1, 0, 0).unwrap();
        // 01:00 local Friday morning: tail of Thursday's window, not listed.
        let friday_morning = Utc.with_ymd_and_hms(2025, 6, 19, 23, 0, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, evening, berlin()));
        assert!(WindowEvaluator::is_active(&w, morning, berlin()));
        assert!(!WindowEvaluator::is_active(&w, late, berlin()));
        assert!(!WindowEvaluator::is_active(&w, friday_morning, berlin()));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let mut w = window(all_days(), (9, 0), (17, 0));
        w.start_date = NaiveDate::from_ymd_opt(2025, 6, 18);
        w.end_date = NaiveDate::from_ymd_opt(2025, 6, 19);
        let on_start = Utc.with_ymd_and_hms(2025, 6, 18, 8, 0, 0).unwrap();
        let on_end = Utc.with_ymd_and_hms(2025, 6, 19, 8, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 6, 20, 8, 0, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, on_start, berlin()));
        assert!(WindowEvaluator::is_active(&w, on_end, berlin()));
        assert!(!WindowEvaluator::is_active(&w, outside, berlin()));
    }

    #[test]
    fn overnight_date_bounds_apply_to_start_day() {
        // Window bounded to exactly 2025-06-20 (a Friday), 22:00-02:00.
        let mut w = window(all_days(), (22, 0), (2, 0));
        w.start_date = NaiveDate::from_ymd_opt(2025, 6, 20);
        w.end_date = NaiveDate::from_ymd_opt(2025, 6, 20);
        // Saturday 01:00 local still belongs to Friday's window.
        let morning_tail = Utc.with_ymd_and_hms(2025, 6, 20, 23, 0, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, morning_tail, berlin()));
        // Sunday 01:00 local would start from Saturday, out of bounds.
        let next_day = Utc.with_ymd_and_hms(2025, 6, 21, 23, 0, 0).unwrap();
        assert!(!WindowEvaluator::is_active(&w, next_day, berlin()));
    }

    #[test]
    fn window_unaffected_away_from_dst_transition() {
        // Berlin springs forward 2025-03-30 02:00 -> 03:00.
        let w = window(all_days(), (9, 0), (17, 0));
        let that_day = Utc.with_ymd_and_hms(2025, 3, 30, 8, 0, 0).unwrap(); // 10:00 CEST
        assert!(WindowEvaluator::is_active(&w, that_day, berlin()));
    }

    #[test]
    fn window_inside_skipped_hour_never_matches() {
        // 02:00-03:00 local does not exist on 2025-03-30 in Berlin.
        let w = window(all_days(), (2, 0), (3, 0));
        // Walk the surrounding UTC hours; no instant may report active.
        for minute in 0..240 {
            let now = Utc.with_ymd_and_hms(2025, 3, 30, 0, 0, 0).unwrap()
                + Duration::minutes(minute);
            assert!(
                !WindowEvaluator::is_active(&w, now, berlin()),
                "matched at {now}"
            );
        }
        // The same window still works the day before.
        let saturday = Utc.with_ymd_and_hms(2025, 3, 29, 1, 30, 0).unwrap(); // 02:30 CET
        assert!(WindowEvaluator::is_active(&w, saturday, berlin()));
    }

    #[test]
    fn window_straddling_the_gap_still_matches_outside_it() {
        // 01:00-04:00 local on the spring-forward day: the 02:00-03:00 slice
        // is skipped, but the rest of the window behaves normally.
        let w = window(all_days(), (1, 0), (4, 0));
        let before_gap = Utc.with_ymd_and_hms(2025, 3, 30, 0, 30, 0).unwrap(); // 01:30 CET
        let after_gap = Utc.with_ymd_and_hms(2025, 3, 30, 1, 30, 0).unwrap(); // 03:30 CEST
        assert!(WindowEvaluator::is_active(&w, before_gap, berlin()));
        assert!(WindowEvaluator::is_active(&w, after_gap, berlin()));
    }

    #[test]
    fn repeated_hour_matches_first_occurrence_only() {
        // Berlin falls back 2025-10-26 03:00 CEST -> 02:00 CET; 02:00-03:00
        // local occurs twice.
        let w = window(all_days(), (2, 0), (3, 0));
        // First occurrence: 00:30 UTC is 02:30 CEST.
        let first = Utc.with_ymd_and_hms(2025, 10, 26, 0, 30, 0).unwrap();
        // Second occurrence: 01:30 UTC is 02:30 CET.
        let second = Utc.with_ymd_and_hms(2025, 10, 26, 1, 30, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, first, berlin()));
        assert!(!WindowEvaluator::is_active(&w, second, berlin()));
    }

    #[test]
    fn fall_back_day_unaffected_outside_the_fold() {
        let w = window(all_days(), (9, 0), (17, 0));
        // 10:00 CET on the fall-back day.
        let now = Utc.with_ymd_and_hms(2025, 10, 26, 9, 0, 0).unwrap();
        assert!(WindowEvaluator::is_active(&w, now, berlin()));
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        assert!(parse_tz("Europe/Berlin").is_ok());
        assert!(parse_tz("Not/AZone").is_err());
    }
}
