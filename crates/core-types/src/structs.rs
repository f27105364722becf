use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single calendar month, the unit of time for all trade data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::InvalidInput(
                "month".to_string(),
                format!("{} is not in 1..=12", month),
            ));
        }
        Ok(Self { year, month })
    }

    /// A linear month index used for contiguity checks across year boundaries.
    pub fn key(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    /// The month immediately after this one.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// The compact `YYYYMM` form used by the external statistics source.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// All months from `from` to `to`, inclusive. Errors when the range is inverted.
    pub fn range_inclusive(from: YearMonth, to: YearMonth) -> Result<Vec<YearMonth>, CoreError> {
        if from.key() > to.key() {
            return Err(CoreError::InvalidPeriodRange(format!(
                "{} is after {}",
                from, to
            )));
        }
        let mut months = Vec::with_capacity((to.key() - from.key() + 1) as usize);
        let mut cursor = from;
        while cursor.key() <= to.key() {
            months.push(cursor);
            cursor = cursor.next();
        }
        Ok(months)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CoreError;

    /// Parses the `YYYY-MM` form used on the trigger interface.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or_else(|| {
            CoreError::InvalidInput("period".to_string(), format!("{:?} is not YYYY-MM", s))
        })?;
        let year: i32 = year.parse().map_err(|_| {
            CoreError::InvalidInput("period".to_string(), format!("bad year in {:?}", s))
        })?;
        let month: u32 = month.parse().map_err(|_| {
            CoreError::InvalidInput("period".to_string(), format!("bad month in {:?}", s))
        })?;
        YearMonth::new(year, month)
    }
}

/// A traded goods category, identified by its canonical 6-digit code.
///
/// The code is immutable once created; upserts refresh every other field.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Commodity {
    pub code: String,
    pub title: String,
    pub description: String,
    pub sectors: Vec<String>,
    pub capex_min: Option<Decimal>,
    pub capex_max: Option<Decimal>,
}

/// One observed monthly trade flow for a commodity from one partner country.
///
/// Uniqueness is over `(code, year, month, partner)`; re-ingestion upserts
/// on that key so the table only ever grows by new observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyImport {
    pub code: String,
    pub year: i32,
    pub month: u32,
    pub value: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub partner: String,
}

/// One month of a commodity's aggregated time series (summed across partners).
///
/// `total` is `None` when the month is present in the data but carries no
/// recorded value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub year: i32,
    pub month: u32,
    pub total: Option<f64>,
}

impl MonthlyTotal {
    pub fn month_key(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }
}

/// The derived per-commodity progress metrics, recomputed as a whole on each
/// run of the recompute job. A materialized view, not a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgressSnapshot {
    pub code: String,
    pub baseline_value: Option<f64>,
    pub baseline_period: Option<String>,
    pub current_value: Option<f64>,
    pub reduction_abs: Option<f64>,
    pub reduction_pct: Option<f64>,
    pub hhi_baseline: Option<f64>,
    pub hhi_current: Option<f64>,
    pub concentration_shift: Option<f64>,
    pub opportunity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_parses_and_rejects() {
        let ym: YearMonth = "2024-03".parse().unwrap();
        assert_eq!(ym, YearMonth { year: 2024, month: 3 });
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("202403".parse::<YearMonth>().is_err());
    }

    #[test]
    fn range_crosses_year_boundary() {
        let from = YearMonth::new(2023, 11).unwrap();
        let to = YearMonth::new(2024, 2).unwrap();
        let months = YearMonth::range_inclusive(from, to).unwrap();
        assert_eq!(months.len(), 4);
        assert_eq!(months[1].compact(), "202312");
        assert_eq!(months[2].compact(), "202401");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let from = YearMonth::new(2024, 5).unwrap();
        let to = YearMonth::new(2024, 4).unwrap();
        assert!(YearMonth::range_inclusive(from, to).is_err());
    }
}
