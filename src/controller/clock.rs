//! Wall-clock alignment and time-of-day windows.

use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigurationError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Computes sleeps that end on minute boundaries divisible by N, so periodic
/// tasks never drift no matter how long their bodies take.
#[derive(Clone)]
pub struct ClockAligner {
    clock: Arc<dyn Clock>,
}

impl ClockAligner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn delay_until_next_boundary(&self, n_minutes: u32) -> Result<Duration, ConfigurationError> {
        delay_until_next_boundary(n_minutes, self.clock.now())
    }
}

/// Accept only intervals that tile an hour (1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60)
pub fn validate_interval(n_minutes: u32) -> Result<(), ConfigurationError> {
    if n_minutes == 0 || 60 % n_minutes != 0 {
        return Err(ConfigurationError::InvalidInterval(n_minutes));
    }
    Ok(())
}

/// Delay from `now` until the next `HH:MM:00` whose minute is a multiple of
/// `n_minutes`. Exactly on a boundary, the next one is a full interval away.
pub fn delay_until_next_boundary(
    n_minutes: u32,
    now: NaiveDateTime,
) -> Result<Duration, ConfigurationError> {
    validate_interval(n_minutes)?;

    let minutes_to_next = n_minutes - now.minute() % n_minutes;
    let truncated = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next = truncated + chrono::Duration::minutes(i64::from(minutes_to_next));

    Ok((next - now)
        .to_std()
        .unwrap_or(Duration::from_secs(u64::from(n_minutes) * 60)))
}

/// Half-open `[start, end)` time-of-day window. A window whose start is later
/// than its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parse `["HH:MM", "HH:MM"]`
    pub fn parse(name: &str, window: &[String]) -> Result<Self, ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedPeriod {
            name: name.to_string(),
            reason,
        };
        let [start, end] = window else {
            return Err(malformed(format!(
                "expected [start, end], got {} entries",
                window.len()
            )));
        };
        let parse = |raw: &String| {
            NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                .map_err(|e| malformed(format!("'{raw}': {e}")))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Whether `t` falls within `grace_minutes` after the window's end,
    /// including when that grace period crosses midnight.
    pub fn just_ended(&self, t: NaiveTime, grace_minutes: u32) -> bool {
        let since_end = (t - self.end).num_seconds().rem_euclid(SECONDS_PER_DAY);
        since_end < i64::from(grace_minutes) * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow::parse("test", &[start.to_string(), end.to_string()]).unwrap()
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(4)]
    #[case(5)]
    #[case(6)]
    #[case(10)]
    #[case(12)]
    #[case(15)]
    #[case(20)]
    #[case(30)]
    #[case(60)]
    fn test_valid_intervals_land_on_boundaries(#[case] n: u32) {
        for now in [at(10, 0, 0), at(10, 7, 42), at(23, 59, 59), at(0, 29, 1)] {
            let delay = delay_until_next_boundary(n, now).unwrap();
            assert!(delay > Duration::ZERO);
            assert!(delay <= Duration::from_secs(u64::from(n) * 60));
            let next = now + chrono::Duration::from_std(delay).unwrap();
            assert_eq!(next.second(), 0);
            assert_eq!(next.minute() % n, 0);
        }
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(25)]
    #[case(45)]
    #[case(90)]
    fn test_invalid_intervals_rejected(#[case] n: u32) {
        let err = delay_until_next_boundary(n, at(10, 0, 0)).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidInterval(v) if v == n));
    }

    #[test]
    fn test_exact_boundary_waits_full_interval() {
        let delay = delay_until_next_boundary(5, at(10, 15, 0)).unwrap();
        assert_eq!(delay, Duration::from_secs(300));
    }

    #[test]
    fn test_mid_minute_truncates_before_adding() {
        let delay = delay_until_next_boundary(5, at(10, 13, 30)).unwrap();
        assert_eq!(delay, Duration::from_secs(90));
    }

    #[test]
    fn test_window_is_half_open() {
        let w = window("09:00", "18:00");
        assert!(w.contains(t(9, 0)));
        assert!(w.contains(t(17, 59)));
        assert!(!w.contains(t(18, 0)));
        assert!(!w.contains(t(8, 59)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let w = window("22:00", "02:00");
        assert!(w.contains(t(23, 0)));
        assert!(w.contains(t(1, 59)));
        assert!(!w.contains(t(2, 0)));
        assert!(!w.contains(t(12, 0)));
    }

    #[rstest]
    #[case(window("09:00", "18:00"), t(18, 0), true)]
    #[case(window("09:00", "18:00"), t(18, 4), true)]
    #[case(window("09:00", "18:00"), t(18, 5), false)]
    #[case(window("09:00", "18:00"), t(17, 59), false)]
    #[case(window("20:00", "23:58"), t(0, 2), true)]
    #[case(window("20:00", "23:58"), t(0, 3), false)]
    fn test_grace_after_end(#[case] w: TimeWindow, #[case] now: NaiveTime, #[case] expected: bool) {
        assert_eq!(w.just_ended(now, 5), expected);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec!["09:00".to_string()])]
    #[case(vec!["9am".to_string(), "18:00".to_string()])]
    #[case(vec!["09:00".to_string(), "25:00".to_string()])]
    fn test_malformed_windows(#[case] raw: Vec<String>) {
        let err = TimeWindow::parse("daytime", &raw).unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedPeriod { ref name, .. } if name == "daytime"));
    }
}
