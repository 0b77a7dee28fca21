//! Aggregation period keys
//!
//! A period is either one source file or one calendar month. Keys have a
//! stable string form ("file:<id>", "month:YYYY-MM") used in cache entry and
//! rebuild job documents.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Aggregation scope for a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeriodKey {
    /// Totals for one source file
    File(String),
    /// Totals for one calendar month
    Month { year: i32, month: u32 },
}

impl PeriodKey {
    /// Month period containing the given date
    pub fn month_of(date: NaiveDate) -> Self {
        PeriodKey::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of the month, for month periods
    pub fn month_start(&self) -> Option<NaiveDate> {
        match self {
            PeriodKey::Month { year, month } => NaiveDate::from_ymd_opt(*year, *month, 1),
            PeriodKey::File(_) => None,
        }
    }

    /// First day of the following month, for month periods
    pub fn month_end_exclusive(&self) -> Option<NaiveDate> {
        match self {
            PeriodKey::Month { year, month } => {
                let (next_year, next_month) = if *month == 12 {
                    (year + 1, 1)
                } else {
                    (*year, month + 1)
                };
                NaiveDate::from_ymd_opt(next_year, next_month, 1)
            }
            PeriodKey::File(_) => None,
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::File(id) => write!(f, "file:{}", id),
            PeriodKey::Month { year, month } => write!(f, "month:{:04}-{:02}", year, month),
        }
    }
}

impl FromStr for PeriodKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("file:") {
            if id.is_empty() {
                return Err(PipelineError::Config("empty file id in period key".into()));
            }
            return Ok(PeriodKey::File(id.to_string()));
        }
        if let Some(rest) = s.strip_prefix("month:") {
            let (year, month) = rest
                .split_once('-')
                .ok_or_else(|| PipelineError::Config(format!("invalid month period: {}", s)))?;
            let year: i32 = year
                .parse()
                .map_err(|_| PipelineError::Config(format!("invalid year in period: {}", s)))?;
            let month: u32 = month
                .parse()
                .map_err(|_| PipelineError::Config(format!("invalid month in period: {}", s)))?;
            if !(1..=12).contains(&month) {
                return Err(PipelineError::Config(format!("month out of range: {}", s)));
            }
            return Ok(PeriodKey::Month { year, month });
        }
        Err(PipelineError::Config(format!(
            "period key must start with 'file:' or 'month:': {}",
            s
        )))
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_string_form() {
        let file: PeriodKey = "file:20260115-001".parse().unwrap();
        assert_eq!(file, PeriodKey::File("20260115-001".to_string()));
        assert_eq!(file.to_string(), "file:20260115-001");

        let month: PeriodKey = "month:2026-01".parse().unwrap();
        assert_eq!(month, PeriodKey::Month { year: 2026, month: 1 });
        assert_eq!(month.to_string(), "month:2026-01");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("week:2026-01".parse::<PeriodKey>().is_err());
        assert!("month:2026-13".parse::<PeriodKey>().is_err());
        assert!("month:2026".parse::<PeriodKey>().is_err());
        assert!("file:".parse::<PeriodKey>().is_err());
    }

    #[test]
    fn month_bounds_cover_year_rollover() {
        let dec = PeriodKey::Month { year: 2026, month: 12 };
        assert_eq!(
            dec.month_end_exclusive(),
            NaiveDate::from_ymd_opt(2027, 1, 1)
        );
    }

    #[test]
    fn month_of_maps_dates() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert_eq!(
            PeriodKey::month_of(date),
            PeriodKey::Month { year: 2026, month: 1 }
        );
    }
}
