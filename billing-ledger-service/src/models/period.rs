//! Billing months and accrual periods.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// A calendar month, the unit of billing and of period close.
///
/// Stored as the first day of the month so ordering and date arithmetic come
/// from `NaiveDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth(NaiveDate);

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, LedgerError> {
        if !(1900..=9999).contains(&year) {
            return Err(LedgerError::validation(format!("year {} out of range", year)));
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .ok_or_else(|| LedgerError::validation(format!("month {} out of range", month)))
    }

    /// The month a date falls in.
    pub fn of(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + Months::new(1))
    }

    /// Charges are due on the first day of the following month unless the
    /// period says otherwise.
    pub fn default_due_date(&self) -> NaiveDate {
        self.next().first_day()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for BillingMonth {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::validation(format!("invalid month '{}', expected YYYY-MM", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(month: BillingMonth) -> Self {
        month.to_string()
    }
}

/// What a charge is billed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeCategory {
    Membership,
    Target,
    Electricity,
    Other,
}

impl ChargeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Membership => "membership",
            Self::Target => "target",
            Self::Electricity => "electricity",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ChargeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A billing cycle: one category of charges for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualPeriod {
    pub period_id: Uuid,
    pub month: BillingMonth,
    pub category: ChargeCategory,
    pub due_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_month() {
        let month: BillingMonth = "2025-01".parse().unwrap();
        assert_eq!(month.year(), 2025);
        assert_eq!(month.month(), 1);
        assert_eq!(month.to_string(), "2025-01");
    }

    #[test]
    fn rejects_malformed_months() {
        assert!("2025-13".parse::<BillingMonth>().is_err());
        assert!("2025-1".parse::<BillingMonth>().is_err());
        assert!("January".parse::<BillingMonth>().is_err());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let december = BillingMonth::new(2024, 12).unwrap();
        assert_eq!(december.next(), BillingMonth::new(2025, 1).unwrap());
        assert_eq!(
            december.default_due_date(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }

    #[test]
    fn months_order_chronologically() {
        let nov = BillingMonth::new(2024, 11).unwrap();
        let jan = BillingMonth::new(2025, 1).unwrap();
        assert!(nov < jan);
    }

    #[test]
    fn serializes_as_string() {
        let month = BillingMonth::new(2025, 2).unwrap();
        assert_eq!(serde_json::to_string(&month).unwrap(), "\"2025-02\"");
        let back: BillingMonth = serde_json::from_str("\"2025-02\"").unwrap();
        assert_eq!(back, month);
    }
}
