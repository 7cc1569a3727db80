use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

/// School years start in September.
pub const ACADEMIC_YEAR_START_MONTH: u32 = 9;

/// A school year spanning September..August, rendered as `"2024-2025"`.
///
/// Ordering is by the start year, never by the rendered string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcademicYear {
    start: i32,
}

impl AcademicYear {
    pub fn from_date(date: NaiveDate) -> Self {
        let start = if date.month() >= ACADEMIC_YEAR_START_MONTH {
            date.year()
        } else {
            date.year() - 1
        };
        Self { start }
    }

    pub fn start_year(self) -> i32 {
        self.start
    }

    pub fn end_year(self) -> i32 {
        self.start + 1
    }

    /// Accepts `"Y-Y+1"`. Anything else (including a mismatched end year) is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let (start, end) = raw.trim().split_once('-')?;
        let start = start.trim().parse::<i32>().ok()?;
        let end = end.trim().parse::<i32>().ok()?;
        if end != start + 1 {
            return None;
        }
        Some(Self { start })
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.start + 1)
    }
}

impl Serialize for AcademicYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A date truncated to its calendar month, rendered as `"2024-03"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthBucket {
    // Field order matters: derived Ord compares year first.
    year: i32,
    month: u32,
}

impl MonthBucket {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (year, month) = raw.trim().split_once('-')?;
        Self::new(year.trim().parse().ok()?, month.trim().parse().ok()?)
    }
}

impl fmt::Display for MonthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for MonthBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
