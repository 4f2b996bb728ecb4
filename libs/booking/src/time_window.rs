//! Time grid arithmetic
//!
//! Reservations live on a lab's wall-clock day, so times are kept as
//! minute-of-day integers parsed from canonical `HH:MM` strings. Intervals
//! are half-open: back-to-back windows never overlap.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::BookingError;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// A minute of the day, `00:00` through `23:59`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Build from hour and minute components
    pub fn from_hm(hour: u16, minute: u16) -> Result<Self, BookingError> {
        if hour >= 24 || minute >= 60 {
            return Err(BookingError::validation(format!(
                "invalid time {:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self(hour * 60 + minute))
    }

    /// Build from a minute-of-day value
    pub fn from_minutes(minutes: u16) -> Result<Self, BookingError> {
        if minutes >= MINUTES_PER_DAY {
            return Err(BookingError::validation(format!(
                "minute of day {} out of range",
                minutes
            )));
        }
        Ok(Self(minutes))
    }

    /// Build from clock components that are already known to be in range
    pub(crate) fn from_clock(hour: u32, minute: u32) -> Self {
        Self(((hour * 60 + minute) % u32::from(MINUTES_PER_DAY)) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl FromStr for TimeOfDay {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BookingError::validation(format!("invalid time '{}', expected HH:MM", s));

        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if hour.len() != 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u16 = hour.parse().map_err(|_| invalid())?;
        let minute: u16 = minute.parse().map_err(|_| invalid())?;

        Self::from_hm(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Deserialize)]
struct RawWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

/// A `[start, end)` window on a lab's day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted ranges
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::validation(format!(
                "window start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two `HH:MM` strings
    pub fn parse(start: &str, end: &str) -> Result<Self, BookingError> {
        Self::new(start.parse()?, end.parse()?)
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Half-open overlap; equal boundaries do not overlap
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Half-open inclusion of a single point
    pub fn contains(&self, point: TimeOfDay) -> bool {
        self.start <= point && point < self.end
    }
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = BookingError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Enumerated block boundaries of a lab day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    boundaries: Vec<TimeOfDay>,
}

impl SlotGrid {
    /// Number of blocks in the standard day
    pub const STANDARD_BLOCKS: u16 = 17;
    const STANDARD_FIRST: u16 = 8 * 60 + 10;
    const STANDARD_BLOCK_MINUTES: u16 = 40;

    /// The standard 17-block day: 40-minute blocks from 08:10 to 19:30
    pub fn standard() -> Self {
        let boundaries = (0..=Self::STANDARD_BLOCKS)
            .map(|k| TimeOfDay(Self::STANDARD_FIRST + k * Self::STANDARD_BLOCK_MINUTES))
            .collect();
        Self { boundaries }
    }

    pub fn boundaries(&self) -> &[TimeOfDay] {
        &self.boundaries
    }

    /// Every bookable block of the grid, in order
    pub fn blocks(&self) -> Vec<TimeWindow> {
        self.boundaries
            .windows(2)
            .map(|pair| TimeWindow {
                start: pair[0],
                end: pair[1],
            })
            .collect()
    }

    /// Check that a window starts and ends on grid boundaries
    pub fn validate(&self, window: &TimeWindow) -> Result<(), BookingError> {
        for point in [window.start, window.end] {
            if self.boundaries.binary_search(&point).is_err() {
                return Err(BookingError::validation(format!(
                    "{} is not a block boundary of the lab's time grid",
                    point
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_round_trip() {
        assert_eq!(t("08:10").minutes(), 490);
        assert_eq!(t("23:59").to_string(), "23:59");
        assert_eq!(t("00:00").minutes(), 0);
    }

    #[test]
    fn test_rejects_malformed_times() {
        for bad in ["8:10", "24:00", "12:60", "ab:cd", "1210", "12:1", ""] {
            assert!(bad.parse::<TimeOfDay>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_window_rejects_inverted_and_empty() {
        assert!(TimeWindow::parse("09:30", "08:10").is_err());
        assert!(TimeWindow::parse("09:30", "09:30").is_err());
    }

    #[test]
    fn test_back_to_back_windows_do_not_overlap() {
        let first = TimeWindow::parse("08:10", "09:30").unwrap();
        let second = TimeWindow::parse("09:30", "11:00").unwrap();
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn test_partial_and_nested_windows_overlap() {
        let base = TimeWindow::parse("08:10", "09:30").unwrap();
        assert!(base.overlaps(&TimeWindow::parse("09:00", "10:00").unwrap()));
        assert!(base.overlaps(&TimeWindow::parse("08:30", "09:00").unwrap()));
        assert!(base.overlaps(&TimeWindow::parse("07:00", "12:00").unwrap()));
    }

    #[test]
    fn test_contains_is_half_open() {
        let window = TimeWindow::parse("08:10", "09:30").unwrap();
        assert!(window.contains(t("08:10")));
        assert!(window.contains(t("09:29")));
        assert!(!window.contains(t("09:30")));
    }

    #[test]
    fn test_window_deserialization_validates() {
        let ok: TimeWindow = serde_json::from_str(r#"{"start":"08:10","end":"09:30"}"#).unwrap();
        assert_eq!(ok.duration_minutes(), 80);

        let inverted = serde_json::from_str::<TimeWindow>(r#"{"start":"10:00","end":"09:00"}"#);
        assert!(inverted.is_err());
    }

    #[test]
    fn test_standard_grid_has_seventeen_blocks() {
        let grid = SlotGrid::standard();
        let blocks = grid.blocks();
        assert_eq!(blocks.len(), 17);
        assert_eq!(blocks[0].to_string(), "08:10-08:50");
        assert_eq!(blocks[16].end(), t("19:30"));
    }

    #[test]
    fn test_grid_validation() {
        let grid = SlotGrid::standard();
        assert!(grid.validate(&TimeWindow::parse("08:10", "09:30").unwrap()).is_ok());
        assert!(grid.validate(&TimeWindow::parse("09:00", "10:00").unwrap()).is_err());
    }
}
