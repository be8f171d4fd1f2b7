use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("empty window: start {start} is not before end {end}")]
pub struct EmptyWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Half-open `[start, end)` interval of local wall-clock timestamps.
///
/// Construction rejects empty intervals, so every `TimeWindow` in the
/// system satisfies `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TimeWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

/// Calendar granularities the planner decomposes into, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    HalfDay,
    Hour,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::HalfDay => "half-day",
            Granularity::Hour => "hour",
        }
    }

    /// First aligned boundary strictly after `t`.
    fn next_boundary(self, t: NaiveDateTime) -> NaiveDateTime {
        let midnight = t.date().and_time(NaiveTime::MIN);
        match self {
            Granularity::Day => midnight + Duration::days(1),
            Granularity::HalfDay => {
                let noon = midnight + Duration::hours(12);
                if t < noon {
                    noon
                } else {
                    midnight + Duration::days(1)
                }
            }
            Granularity::Hour => midnight + Duration::hours(i64::from(t.hour()) + 1),
        }
    }
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, EmptyWindow> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(EmptyWindow { start, end })
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Cut the window at every `granularity` boundary inside it.
    ///
    /// Pieces are returned in chronological order and tile `self` exactly;
    /// only the first and last piece can be shorter than the granularity,
    /// and only when `self` itself is not aligned.
    pub fn split(&self, granularity: Granularity) -> Vec<TimeWindow> {
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = granularity.next_boundary(cursor).min(self.end);
            out.push(TimeWindow {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }

    /// `[first day of the previous month 00:00, now)`, the window a scheduled
    /// run covers.
    pub fn previous_month_to(now: NaiveDateTime) -> Result<Self, EmptyWindow> {
        let today = now.date();
        let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .and_then(|d| d.checked_sub_months(Months::new(1)))
            .unwrap_or(today);
        Self::new(month_start.and_time(NaiveTime::MIN), now)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn window(a: &str, b: &str) -> TimeWindow {
        TimeWindow::new(at(a), at(b)).unwrap()
    }

    fn assert_tiles(parent: &TimeWindow, pieces: &[TimeWindow]) {
        assert!(!pieces.is_empty());
        assert_eq!(pieces.first().unwrap().start(), parent.start());
        assert_eq!(pieces.last().unwrap().end(), parent.end());
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
    }

    #[test]
    fn rejects_empty_and_inverted_windows() {
        let t = at("2024-05-01 00:00:00");
        assert!(TimeWindow::new(t, t).is_err());
        assert!(TimeWindow::new(t + Duration::hours(1), t).is_err());
    }

    #[test]
    fn splits_days_and_clips_partial_edges() {
        let w = window("2024-05-01 06:30:00", "2024-05-03 10:15:00");
        let days = w.split(Granularity::Day);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], window("2024-05-01 06:30:00", "2024-05-02 00:00:00"));
        assert_eq!(days[1], window("2024-05-02 00:00:00", "2024-05-03 00:00:00"));
        assert_eq!(days[2], window("2024-05-03 00:00:00", "2024-05-03 10:15:00"));
        assert_tiles(&w, &days);
    }

    #[test]
    fn splits_day_into_halves_and_hours() {
        let day = window("2024-05-02 00:00:00", "2024-05-03 00:00:00");
        let halves = day.split(Granularity::HalfDay);
        assert_eq!(
            halves,
            vec![
                window("2024-05-02 00:00:00", "2024-05-02 12:00:00"),
                window("2024-05-02 12:00:00", "2024-05-03 00:00:00"),
            ]
        );
        let hours = halves[1].split(Granularity::Hour);
        assert_eq!(hours.len(), 12);
        assert!(hours.iter().all(|h| h.duration() == Duration::hours(1)));
        assert_tiles(&halves[1], &hours);
    }

    #[test]
    fn previous_month_window_crosses_year_boundary() {
        let w = TimeWindow::previous_month_to(at("2025-01-14 09:20:00")).unwrap();
        assert_eq!(w.start(), at("2024-12-01 00:00:00"));
        assert_eq!(w.end(), at("2025-01-14 09:20:00"));
    }
}
