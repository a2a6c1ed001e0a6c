// 📅 Billing Period - Total order over (year, month)
// One period = one calendar month of tuition. Ordering and arithmetic use a
// linear index (year*12 + month) so the sequential-payment rules never touch
// calendar math.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A (year, month) billing period. Month is always 1-12.
///
/// Field order matters: deriving `Ord` on (year, month) gives the same total
/// order as the linear index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Create a period, rejecting out-of-range months
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("invalid month {} (must be 1-12)", month);
        }
        Ok(Period { year, month })
    }

    /// Period containing a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Period containing a UTC instant
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Period {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Linear index: year*12 + month. Two periods compare exactly as their
    /// indexes do, and consecutive months differ by exactly 1.
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + self.month as i64
    }

    /// Inverse of `index`. An index divisible by 12 is December of the
    /// previous quotient year, not month zero.
    pub fn from_index(index: i64) -> Self {
        let rem = index.rem_euclid(12);
        if rem == 0 {
            Period {
                year: (index / 12 - 1) as i32,
                month: 12,
            }
        } else {
            Period {
                year: index.div_euclid(12) as i32,
                month: rem as u32,
            }
        }
    }

    /// The month after this one
    pub fn next(&self) -> Self {
        Period::from_index(self.index() + 1)
    }

    /// The month before this one
    pub fn prev(&self) -> Self {
        Period::from_index(self.index() - 1)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

// ============================================================================
// TESTS
// ============================================================================
