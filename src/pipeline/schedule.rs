//! Teaching period schedule.
//!
//! Times are zero-padded `"HH:MM"` strings and are compared lexicographically,
//! which orders them the same way as the wall clock within one day. Windows
//! that cross midnight are not supported.

use crate::error::{AttendanceError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingPeriod {
    pub start_time: String,
    pub end_time: String,
}

impl TeachingPeriod {
    pub fn new(start_time: impl Into<String>, end_time: impl Into<String>) -> Self {
        Self { start_time: start_time.into(), end_time: end_time.into() }
    }

    /// Inclusive at both ends.
    pub fn contains(&self, now: &str) -> bool {
        self.start_time.as_str() <= now && now <= self.end_time.as_str()
    }
}

/// 1-based index of the first period containing `now`, or `None`.
///
/// No validation happens here: with overlapping or unsorted input the first
/// match in list order wins.
pub fn current_period(now: &str, periods: &[TeachingPeriod]) -> Option<usize> {
    periods.iter().position(|p| p.contains(now)).map(|i| i + 1)
}

/// A validated, ordered list of periods.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    periods: Vec<TeachingPeriod>,
}

impl Schedule {
    /// Rejects malformed times, inverted windows, and lists that are not
    /// ascending and non-overlapping.
    pub fn new(periods: Vec<TeachingPeriod>) -> Result<Self> {
        for (i, p) in periods.iter().enumerate() {
            let n = i + 1;
            check_hhmm(&p.start_time, n)?;
            check_hhmm(&p.end_time, n)?;
            if p.start_time > p.end_time {
                return Err(AttendanceError::InvalidConfig(format!(
                    "period {} starts at {} after it ends at {}",
                    n, p.start_time, p.end_time
                )));
            }
            if i > 0 {
                let prev = &periods[i - 1];
                if p.start_time <= prev.end_time {
                    return Err(AttendanceError::InvalidConfig(format!(
                        "period {} ({}-{}) overlaps or precedes period {} ({}-{})",
                        n, p.start_time, p.end_time, i, prev.start_time, prev.end_time
                    )));
                }
            }
        }
        Ok(Self { periods })
    }

    pub fn current_period(&self, now: &str) -> Option<usize> {
        current_period(now, &self.periods)
    }

    pub fn period(&self, index: usize) -> Option<&TeachingPeriod> {
        index.checked_sub(1).and_then(|i| self.periods.get(i))
    }

    pub fn periods(&self) -> &[TeachingPeriod] {
        &self.periods
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

// Lexicographic comparison is only sound for the exact zero-padded shape.
fn check_hhmm(value: &str, period: usize) -> Result<()> {
    let well_formed = value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(AttendanceError::InvalidConfig(format!(
            "period {} has malformed time {:?}, expected HH:MM",
            period, value
        )))
    }
}
