//! # Rate Batches
//!
//! Time-windowed price tiers for an event, and the resolver that picks the
//! batch in effect on a given date.
//!
//! Batch ranges are closed date intervals: both the start and the end day
//! belong to the batch. Two batches of the same event may never share a day.

use crate::error::{PackageError, PackageResult, ValidationErrors};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed `[start, end]` date range with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `end <= start`
    pub fn new(start: NaiveDate, end: NaiveDate) -> PackageResult<Self> {
        if end <= start {
            return Err(PackageError::Validation(ValidationErrors::single(
                "end_date",
                "end date must be after the start date",
            )));
        }
        Ok(Self { start, end })
    }

    /// Inclusive on both ends
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Closed-interval overlap, covers partial overlap and containment
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Price and date window requested for a new or updated batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInput {
    pub price: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BatchInput {
    pub fn new(price: Decimal, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            price,
            start_date,
            end_date,
        }
    }

    /// Validate price and dates, collecting both failures
    pub fn validate(&self) -> PackageResult<DateRange> {
        let mut errors = ValidationErrors::new();
        if self.price < Decimal::ZERO {
            errors.push("price", "price must not be negative");
        }
        if self.end_date <= self.start_date {
            errors.push("end_date", "end date must be after the start date");
        }
        errors.into_result()?;
        Ok(DateRange {
            start: self.start_date,
            end: self.end_date,
        })
    }
}

/// A price tier valid for a date window of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBatch {
    pub id: Uuid,
    pub event_id: Uuid,
    pub price: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl RateBatch {
    pub fn new(event_id: Uuid, price: Decimal, range: DateRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            price: price.round_dp(2),
            start_date: range.start,
            end_date: range.end,
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Whether `date` falls inside this batch (inclusive)
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.range().contains(date)
    }
}

/// Find the batch whose window contains `as_of`.
///
/// Non-overlap is enforced at write time, so at most one batch matches.
pub fn find_active_batch(batches: &[RateBatch], as_of: NaiveDate) -> Option<&RateBatch> {
    batches.iter().find(|b| b.is_active_on(as_of))
}

/// True iff no batch other than `exclude_batch_id` overlaps `candidate`
pub fn validate_no_overlap(
    batches: &[RateBatch],
    candidate: &DateRange,
    exclude_batch_id: Option<Uuid>,
) -> bool {
    !batches
        .iter()
        .filter(|b| Some(b.id) != exclude_batch_id)
        .any(|b| b.range().overlaps(candidate))
}
