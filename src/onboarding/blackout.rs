//! Weekly blackout window.
//!
//! The weekly broadcast goes out to everyone on Monday evening (UTC). From
//! Sunday 00:00 through the configured Monday hour, the personalized
//! markets digest would land right next to it, so onboarding skips it.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Stateless predicate over UTC day-of-week and hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackoutWindow {
    /// Last Monday hour (inclusive) inside the window.
    pub last_monday_hour: u32,
}

impl Default for BlackoutWindow {
    fn default() -> Self {
        Self {
            last_monday_hour: 19,
        }
    }
}

impl BlackoutWindow {
    pub fn new(last_monday_hour: u32) -> Self {
        Self { last_monday_hour }
    }

    /// `day == 0 || (day == 1 && hour <= last_monday_hour)`, with day
    /// counted from Sunday = 0.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        let day = at.weekday().num_days_from_sunday();
        let hour = at.hour();
        day == 0 || (day == 1 && hour <= self.last_monday_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2024-03-03 is a Sunday.
    fn at(day_of_month: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day_of_month, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn all_of_sunday_is_blacked_out() {
        let window = BlackoutWindow::default();
        for hour in 0..24 {
            assert!(window.is_active(at(3, hour, 30)), "Sunday {hour}:30");
        }
    }

    #[test]
    fn monday_until_hour_nineteen_inclusive() {
        let window = BlackoutWindow::default();
        for hour in 0..=19 {
            assert!(window.is_active(at(4, hour, 0)), "Monday {hour}:00");
        }
        assert!(window.is_active(at(4, 19, 59)));
        for hour in 20..24 {
            assert!(!window.is_active(at(4, hour, 0)), "Monday {hour}:00");
        }
    }

    #[test]
    fn rest_of_week_is_open() {
        let window = BlackoutWindow::default();
        // Tuesday 5th through Saturday 9th.
        for day in 5..=9 {
            for hour in [0, 10, 19, 23] {
                assert!(!window.is_active(at(day, hour, 0)), "day {day} {hour}:00");
            }
        }
    }

    #[test]
    fn saturday_midnight_boundary() {
        let window = BlackoutWindow::default();
        assert!(!window.is_active(at(2, 23, 59)));
        assert!(window.is_active(at(3, 0, 0)));
    }

    #[test]
    fn configurable_monday_cutoff() {
        let window = BlackoutWindow::new(9);
        assert!(window.is_active(at(4, 9, 0)));
        assert!(!window.is_active(at(4, 10, 0)));
    }
}
