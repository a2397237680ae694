//! Refresh checkpoints and wall-clock access

use anyhow::{Result, anyhow, bail};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Mutex;

/// A time of day at which an upstream is expected to publish fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    hour: u32,
    minute: u32,
}

impl Checkpoint {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            bail!("Invalid checkpoint {hour:02}:{minute:02}");
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Minutes since midnight.
    pub fn minutes(&self) -> i32 {
        (self.hour * 60 + self.minute) as i32
    }
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for Checkpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid checkpoint '{}', expected HH:MM", s))?;
        let hour = h
            .parse()
            .map_err(|_| anyhow!("Invalid checkpoint hour in '{}'", s))?;
        let minute = m
            .parse()
            .map_err(|_| anyhow!("Invalid checkpoint minute in '{}'", s))?;
        Checkpoint::new(hour, minute)
    }
}

impl Serialize for Checkpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Minutes since midnight, ignoring seconds.
pub fn minutes_of(time: NaiveTime) -> i32 {
    (time.hour() * 60 + time.minute()) as i32
}

/// Fixed set of daily checkpoints plus the matching tolerance around each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockWindow {
    checkpoints: Vec<Checkpoint>,
    tolerance_minutes: i32,
}

impl ClockWindow {
    pub const DEFAULT_TOLERANCE_MINUTES: i32 = 5;

    /// Checkpoints must be non-empty and strictly increasing.
    pub fn new(checkpoints: Vec<Checkpoint>, tolerance_minutes: i32) -> Result<Self> {
        if checkpoints.is_empty() {
            bail!("At least one checkpoint is required");
        }
        if tolerance_minutes < 0 {
            bail!("Checkpoint tolerance must not be negative");
        }
        if let Some(pair) = checkpoints.windows(2).find(|w| w[0] >= w[1]) {
            bail!(
                "Checkpoints must be strictly increasing, found {} before {}",
                pair[0],
                pair[1]
            );
        }
        Ok(Self {
            checkpoints,
            tolerance_minutes,
        })
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn tolerance_minutes(&self) -> i32 {
        self.tolerance_minutes
    }

    pub fn first(&self) -> Checkpoint {
        self.checkpoints[0]
    }

    /// Index of the first checkpoint within tolerance of `time`, if any.
    ///
    /// Checkpoints are scanned in ascending order so an exact tie resolves to
    /// the earlier one.
    pub fn window_index_of(&self, time: NaiveTime) -> Option<usize> {
        let minutes = minutes_of(time);
        self.checkpoints
            .iter()
            .position(|c| (minutes - c.minutes()).abs() <= self.tolerance_minutes)
    }

    pub fn next_checkpoint_after(&self, index: usize) -> Option<Checkpoint> {
        self.checkpoints.get(index + 1).copied()
    }

    /// First checkpoint strictly later than `time`.
    pub fn first_checkpoint_later_than(&self, time: NaiveTime) -> Option<Checkpoint> {
        let minutes = minutes_of(time);
        self.checkpoints
            .iter()
            .find(|c| c.minutes() > minutes)
            .copied()
    }

    /// True once `time` is at or past `checkpoint` minus the tolerance.
    pub fn has_reached(&self, time: NaiveTime, checkpoint: Checkpoint) -> bool {
        minutes_of(time) >= checkpoint.minutes() - self.tolerance_minutes
    }

    /// Monday to Friday.
    pub fn is_trading_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

impl Default for ClockWindow {
    fn default() -> Self {
        Self {
            checkpoints: vec![
                Checkpoint { hour: 10, minute: 0 },
                Checkpoint {
                    hour: 13,
                    minute: 30,
                },
                Checkpoint { hour: 17, minute: 0 },
            ],
            tolerance_minutes: Self::DEFAULT_TOLERANCE_MINUTES,
        }
    }
}

/// Source of "now" in the configured local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Wall clock in a fixed timezone.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_index_within_tolerance() {
        let window = ClockWindow::default();

        assert_eq!(window.window_index_of(t(9, 55)), Some(0));
        assert_eq!(window.window_index_of(t(10, 5)), Some(0));
        assert_eq!(window.window_index_of(t(13, 27)), Some(1));
        assert_eq!(window.window_index_of(t(17, 0)), Some(2));

        assert_eq!(window.window_index_of(t(9, 54)), None);
        assert_eq!(window.window_index_of(t(10, 6)), None);
        assert_eq!(window.window_index_of(t(11, 15)), None);
    }

    #[test]
    fn test_window_index_ignores_seconds() {
        let window = ClockWindow::default();
        let time = NaiveTime::from_hms_opt(10, 5, 59).unwrap();
        assert_eq!(window.window_index_of(time), Some(0));
    }

    #[test]
    fn test_equidistant_time_prefers_earlier_checkpoint() {
        let window = ClockWindow::new(
            vec![Checkpoint::new(10, 0).unwrap(), Checkpoint::new(10, 10).unwrap()],
            5,
        )
        .unwrap();

        assert_eq!(window.window_index_of(t(10, 5)), Some(0));
        assert_eq!(window.window_index_of(t(10, 6)), Some(1));
    }

    #[test]
    fn test_next_checkpoint_after() {
        let window = ClockWindow::default();
        assert_eq!(
            window.next_checkpoint_after(0),
            Some(Checkpoint::new(13, 30).unwrap())
        );
        assert_eq!(
            window.next_checkpoint_after(1),
            Some(Checkpoint::new(17, 0).unwrap())
        );
        assert_eq!(window.next_checkpoint_after(2), None);
        assert_eq!(window.next_checkpoint_after(9), None);
    }

    #[test]
    fn test_trading_days() {
        // 2025-11-03 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        for offset in 0..5 {
            assert!(ClockWindow::is_trading_day(
                monday + chrono::Duration::days(offset)
            ));
        }
        assert!(!ClockWindow::is_trading_day(
            NaiveDate::from_ymd_opt(2025, 11, 8).unwrap()
        ));
        assert!(!ClockWindow::is_trading_day(
            NaiveDate::from_ymd_opt(2025, 11, 9).unwrap()
        ));
    }

    #[test]
    fn test_rejects_unordered_checkpoints() {
        let result = ClockWindow::new(
            vec![Checkpoint::new(13, 30).unwrap(), Checkpoint::new(10, 0).unwrap()],
            5,
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("strictly increasing"));

        let duplicate = ClockWindow::new(
            vec![Checkpoint::new(10, 0).unwrap(), Checkpoint::new(10, 0).unwrap()],
            5,
        );
        assert!(duplicate.is_err());

        assert!(ClockWindow::new(vec![], 5).is_err());
    }

    #[test]
    fn test_checkpoint_parsing() {
        let c: Checkpoint = "13:30".parse().unwrap();
        assert_eq!((c.hour(), c.minute()), (13, 30));
        assert_eq!(c.to_string(), "13:30");

        assert!("24:00".parse::<Checkpoint>().is_err());
        assert!("10-00".parse::<Checkpoint>().is_err());
        assert!("ab:cd".parse::<Checkpoint>().is_err());
    }

    #[test]
    fn test_fixed_clock_can_be_moved() {
        let start = NaiveDate::from_ymd_opt(2025, 11, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        let later = start + chrono::Duration::hours(5);
        clock.set(later);
        assert_eq!(clock.now(), later);
        assert_eq!(clock.today(), start.date());
    }
}
