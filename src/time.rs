//! Calendar helpers: inclusive date ranges, rolling windows, and clocks.
//!
//! Transaction dates are calendar days (`NaiveDate`); audit and task
//! timestamps are `DateTime<Utc>`. The filter pipeline never reads the wall
//! clock itself: callers pass `today` in, which keeps derivation pure.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Smallest accepted rolling window, in months.
pub const MIN_WINDOW_MONTHS: u32 = 1;
/// Largest accepted rolling window, in months.
pub const MAX_WINDOW_MONTHS: u32 = 12;

/// Inclusive range of calendar days. Either bound may be open.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use spendgraph::DateRange;
///
/// let march = DateRange::new(
///     NaiveDate::from_ymd_opt(2024, 3, 1),
///     NaiveDate::from_ymd_opt(2024, 3, 31),
/// )
/// .unwrap();
/// assert!(march.contains(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()));
/// assert!(!march.contains(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First included day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,

    /// Last included day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Creates a range, rejecting `from > to`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if both bounds are set and inverted.
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self, ValidationError> {
        let range = Self { from, to };
        range.validate()?;
        Ok(range)
    }

    /// A range with no bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { from: None, to: None }
    }

    /// The calendar month containing `day`.
    #[must_use]
    pub fn month_of(day: NaiveDate) -> Self {
        let first = day.with_day0(0).unwrap_or(day);
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(day);
        Self {
            from: Some(first),
            to: Some(last),
        }
    }

    /// Returns true if neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Returns true if `day` satisfies both bounds.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }

    /// Checks the bound ordering.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if `from > to`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => Err(ValidationError::InvalidDateRange { from, to }),
            _ => Ok(()),
        }
    }
}

/// Checks a rolling window length.
///
/// # Errors
///
/// Returns `ValidationError::WindowOutOfRange` outside `1..=12`.
pub fn validate_window(months: u32) -> Result<u32, ValidationError> {
    if (MIN_WINDOW_MONTHS..=MAX_WINDOW_MONTHS).contains(&months) {
        Ok(months)
    } else {
        Err(ValidationError::WindowOutOfRange { months })
    }
}

/// First day still inside a trailing window of `months` ending on `today`.
///
/// Month arithmetic clamps to the end of shorter months
/// (31 March minus one month is 29 February in a leap year).
#[must_use]
pub fn rolling_cutoff(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day (UTC).
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant, for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
