//! Overdue classification
//!
//! Pure functions over rental records; nothing here writes. Persisting the
//! `연체` status is a separate step in [`super::rentals::RentalsService::mark_overdue`].

use chrono::{DateTime, Duration, Utc};

use crate::models::{
    enums::RentalStatus,
    rental::{OverdueInfo, OverdueSeverity, Rental},
};

/// Elapsed hours from which an overdue rental is critical
pub const CRITICAL_AFTER_HOURS: i64 = 72;

/// Whole hours since `expected_return`, floored. Negative while not yet due.
pub fn elapsed_hours(now: DateTime<Utc>, expected_return: DateTime<Utc>) -> i64 {
    (now - expected_return).num_seconds().div_euclid(3600)
}

pub fn severity(elapsed_hours: i64) -> OverdueSeverity {
    if elapsed_hours >= CRITICAL_AFTER_HOURS {
        OverdueSeverity::Critical
    } else {
        OverdueSeverity::Warning
    }
}

/// Overdue info for a rental, `None` when returned or not at least one hour late
pub fn classify(
    now: DateTime<Utc>,
    expected_return: DateTime<Utc>,
    status: RentalStatus,
) -> Option<OverdueInfo> {
    if !status.is_open() {
        return None;
    }
    let elapsed = elapsed_hours(now, expected_return);
    if elapsed <= 0 {
        return None;
    }
    Some(OverdueInfo {
        elapsed_hours: elapsed,
        severity: severity(elapsed),
    })
}

pub fn classify_rental(now: DateTime<Utc>, rental: &Rental) -> Option<OverdueInfo> {
    classify(now, rental.expected_return_date, rental.status)
}

/// Latest expected return time that counts as overdue at `now`
pub fn overdue_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(1)
}
