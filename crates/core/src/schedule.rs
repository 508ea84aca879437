//! Recurrence patterns and their expansion into concrete session dates.
//!
//! A [`BatchSchedulePattern`] is a pure value object; expansion never touches
//! a store and is bounded by [`MAX_OCCURRENCES`] so a missing end date cannot
//! produce an unbounded run.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Hard cap on the number of dates one pattern may expand into.
pub const MAX_OCCURRENCES: usize = 366;

/// ISO weekday range accepted in `days_of_week` (1 = Monday, 7 = Sunday).
pub const MIN_WEEKDAY: u32 = 1;
pub const MAX_WEEKDAY: u32 = 7;

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// Recurrence kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
    /// Explicit date list carried in `custom_dates`.
    Custom,
}

/// Recurrence specification consumed by the distribution planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSchedulePattern {
    pub recurrence: RecurrenceType,
    /// Step between occurrences in days/weeks/months. Ignored for `Custom`.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// ISO weekday numbers (1 = Monday .. 7 = Sunday). Weekly only; an empty
    /// list falls back to the weekday of `start_date`.
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    /// Days of month (1..=31). Monthly only; an empty list falls back to the
    /// day of `start_date`. Days that do not exist in a month are skipped.
    #[serde(default)]
    pub days_of_month: Vec<u32>,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Dates removed from the expansion (holidays, blackout days).
    #[serde(default)]
    pub exclude_dates: Vec<NaiveDate>,
    /// Explicit dates for `Custom` recurrence.
    #[serde(default)]
    pub custom_dates: Vec<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl BatchSchedulePattern {
    /// Structural validation of the pattern.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.recurrence != RecurrenceType::Custom && self.interval == 0 {
            return Err(CoreError::Validation(
                "Recurrence interval must be at least 1".to_string(),
            ));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(CoreError::Validation(format!(
                    "end_date {end} precedes start_date {}",
                    self.start_date
                )));
            }
        }
        for d in &self.days_of_week {
            if !(MIN_WEEKDAY..=MAX_WEEKDAY).contains(d) {
                return Err(CoreError::Validation(format!(
                    "Invalid ISO weekday {d}; expected {MIN_WEEKDAY}..={MAX_WEEKDAY}"
                )));
            }
        }
        for d in &self.days_of_month {
            if !(1..=31).contains(d) {
                return Err(CoreError::Validation(format!(
                    "Invalid day of month {d}; expected 1..=31"
                )));
            }
        }
        if self.recurrence == RecurrenceType::Custom && self.custom_dates.is_empty() {
            return Err(CoreError::Validation(
                "Custom recurrence requires at least one date in custom_dates".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand the pattern into a sorted, deduplicated list of dates.
    ///
    /// Expansion stops at `end_date` when present, and always at
    /// [`MAX_OCCURRENCES`] dates.
    pub fn expand(&self) -> Result<Vec<NaiveDate>, CoreError> {
        self.validate()?;

        let mut dates = match self.recurrence {
            RecurrenceType::Daily => self.expand_daily(),
            RecurrenceType::Weekly => self.expand_weekly(),
            RecurrenceType::Monthly => self.expand_monthly(),
            RecurrenceType::Custom => self
                .custom_dates
                .iter()
                .copied()
                .filter(|d| *d >= self.start_date)
                .filter(|d| self.end_date.is_none_or(|end| *d <= end))
                .collect(),
        };

        dates.retain(|d| !self.exclude_dates.contains(d));
        dates.sort();
        dates.dedup();
        dates.truncate(MAX_OCCURRENCES);
        Ok(dates)
    }

    fn expand_daily(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut current = self.start_date;
        while self.within_end(current) && out.len() < MAX_OCCURRENCES {
            out.push(current);
            match current.checked_add_days(Days::new(u64::from(self.interval))) {
                Some(next) => current = next,
                None => break,
            }
        }
        out
    }

    fn expand_weekly(&self) -> Vec<NaiveDate> {
        let weekdays: Vec<u32> = if self.days_of_week.is_empty() {
            vec![self.start_date.weekday().number_from_monday()]
        } else {
            self.days_of_week.clone()
        };

        let mut out = Vec::new();
        let mut current = self.start_date;
        while self.within_end(current) && out.len() < MAX_OCCURRENCES {
            let week_index = (current - self.start_date).num_days() / 7;
            if week_index % i64::from(self.interval) == 0
                && weekdays.contains(&current.weekday().number_from_monday())
            {
                out.push(current);
            }
            match current.checked_add_days(Days::new(1)) {
                Some(next) => current = next,
                None => break,
            }
            // Bound the scan when no end date is given: one year of days.
            if (current - self.start_date).num_days() > 366 && self.end_date.is_none() {
                break;
            }
        }
        out
    }

    fn expand_monthly(&self) -> Vec<NaiveDate> {
        let days: Vec<u32> = if self.days_of_month.is_empty() {
            vec![self.start_date.day()]
        } else {
            self.days_of_month.clone()
        };

        let mut out = Vec::new();
        let mut month_anchor = self.start_date.with_day(1).unwrap_or(self.start_date);
        let mut months_scanned = 0u32;
        while out.len() < MAX_OCCURRENCES {
            // Bound the scan when no end date is given: one year of months.
            if self.end_date.is_none() && months_scanned > 12 {
                break;
            }
            for day in &days {
                if let Some(date) =
                    NaiveDate::from_ymd_opt(month_anchor.year(), month_anchor.month(), *day)
                {
                    if date >= self.start_date && self.within_end(date) {
                        out.push(date);
                    }
                }
            }
            match month_anchor.checked_add_months(Months::new(self.interval)) {
                Some(next) => month_anchor = next,
                None => break,
            }
            months_scanned += self.interval;
            if let Some(end) = self.end_date {
                if month_anchor > end {
                    break;
                }
            }
        }
        out
    }

    fn within_end(&self, date: NaiveDate) -> bool {
        self.end_date.is_none_or(|end| date <= end)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
