use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::UnderwritingResult;

/// Calendar ↔ month-index mapping for one deal.
///
/// Month 0 is the calendar month containing the analysis start date; the
/// day of month is discarded. Invariant:
/// `0 <= close_month < exit_month <= hold_period_months`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    start_month: NaiveDate,
    hold_period_months: u32,
    exit_month: u32,
    close_month: u32,
}

/// First day of the month containing `date`.
fn month_floor(date: NaiveDate) -> NaiveDate {
    // Day 1 exists in every month
    date.with_day(1).unwrap_or(date)
}

impl Timeline {
    pub fn new(
        start: NaiveDate,
        hold_period_months: u32,
        exit_month: u32,
        close_month: u32,
    ) -> UnderwritingResult<Self> {
        if hold_period_months == 0 {
            return Err(UnderwritingError::invalid(
                "hold_period_months",
                "Hold period must be at least one month",
            ));
        }
        if exit_month == 0 || exit_month > hold_period_months {
            return Err(UnderwritingError::invalid(
                "exit_month",
                format!("Exit month must be in 1..={hold_period_months}, got {exit_month}"),
            ));
        }
        if close_month >= exit_month {
            return Err(UnderwritingError::invalid(
                "close_month",
                format!("Close month {close_month} must precede exit month {exit_month}"),
            ));
        }
        let start_month = month_floor(start);
        // The terminal boundary must be representable
        start_month
            .checked_add_months(Months::new(hold_period_months))
            .ok_or_else(|| UnderwritingError::DateError("Hold period overflows the calendar".into()))?;

        Ok(Self {
            start_month,
            hold_period_months,
            exit_month,
            close_month,
        })
    }

    pub fn start_month(&self) -> NaiveDate {
        self.start_month
    }

    pub fn hold_period_months(&self) -> u32 {
        self.hold_period_months
    }

    /// Series length for this deal.
    pub fn len(&self) -> usize {
        self.hold_period_months as usize
    }

    pub fn is_empty(&self) -> bool {
        self.hold_period_months == 0
    }

    pub fn exit_month(&self) -> u32 {
        self.exit_month
    }

    pub fn close_month(&self) -> u32 {
        self.close_month
    }

    /// Same calendar, different exit. Used by scenario sweeps.
    pub fn with_exit_month(&self, exit_month: u32) -> UnderwritingResult<Self> {
        Self::new(
            self.start_month,
            self.hold_period_months,
            exit_month,
            self.close_month,
        )
    }

    /// Signed whole-month difference from the start month. Unchecked: dates
    /// before the start are negative, dates after the hold exceed its length.
    pub fn month_offset(&self, date: NaiveDate) -> i64 {
        let years = date.year() as i64 - self.start_month.year() as i64;
        let months = date.month() as i64 - self.start_month.month() as i64;
        years * 12 + months
    }

    /// Month index of `date`; errors when outside `0..hold_period_months`.
    pub fn month_index(&self, date: NaiveDate) -> UnderwritingResult<usize> {
        let offset = self.month_offset(date);
        if offset < 0 || offset >= self.hold_period_months as i64 {
            return Err(UnderwritingError::DateError(format!(
                "{date} falls outside the analysis window starting {} ({} months)",
                self.start_month, self.hold_period_months
            )));
        }
        Ok(offset as usize)
    }

    /// First day of month `index`. `index` may equal the hold period, which
    /// names the boundary just after the last analysed month.
    pub fn date_at(&self, index: usize) -> UnderwritingResult<NaiveDate> {
        if index > self.hold_period_months as usize {
            return Err(UnderwritingError::IndexOutOfBounds {
                context: "timeline".into(),
                index,
                length: self.hold_period_months as usize,
            });
        }
        self.start_month
            .checked_add_months(Months::new(index as u32))
            .ok_or_else(|| UnderwritingError::DateError(format!("Month {index} overflows the calendar")))
    }

    /// Calendar date for an unchecked (possibly negative) month offset.
    pub fn date_at_offset(&self, offset: i64) -> UnderwritingResult<NaiveDate> {
        let shifted = if offset >= 0 {
            self.start_month.checked_add_months(Months::new(offset as u32))
        } else {
            self.start_month
                .checked_sub_months(Months::new(offset.unsigned_abs() as u32))
        };
        shifted.ok_or_else(|| UnderwritingError::DateError(format!("Offset {offset} overflows the calendar")))
    }
}
