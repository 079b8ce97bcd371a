/// Data Models Module
///
/// This module defines the core data structures used throughout the application:
/// the monthly release period and the remote archives listed for it.
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Largest year a period can be built with
const MAX_YEAR: i32 = 9999;

/// A monthly release, identified by year and month.
///
/// Ordering is lexicographic on (year, month), which is also calendar order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(0..=MAX_YEAR).contains(&year) {
            return Err(Error::config(format!("invalid year {} (expected 0000-{})", year, MAX_YEAR)));
        }
        if !(1..=12).contains(&month) {
            return Err(Error::config(format!("invalid month {} (expected 1-12)", month)));
        }
        Ok(Self { year, month })
    }

    /// The release published right after this one.
    pub fn successor(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// Human-readable form used in notifications, e.g. "August 2025".
    pub fn human(&self) -> String {
        let name = u8::try_from(self.month)
            .ok()
            .and_then(|m| chrono::Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("Unknown");
        format!("{} {}", name, self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    /// Parse `YYYY-MM`: exactly four year digits and two month digits.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::config(format!("invalid period {:?} (expected YYYY-MM)", s));

        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let digits = |part: &str, len: usize| part.len() == len && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(year, 4) || !digits(month, 2) {
            return Err(invalid());
        }

        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;

        Self::new(year, month)
    }
}

/// A remote archive listed for one period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Server-relative path, as returned by the listing
    pub href: String,
    /// Size in bytes reported by the server (0 when unknown)
    pub size: u64,
    pub content_type: String,
    pub last_modified: String,
}

impl Artifact {
    /// Last path segment of the href, used as the local file name.
    pub fn file_name(&self) -> &str {
        self.href.trim_end_matches('/').rsplit('/').next().unwrap_or(&self.href)
    }
}
