// ✅ Payment Validator - Sequential monthly-payment rules
// Pure decision functions: given the enrollment date and the set of periods
// already paid, decide whether a new payment may be recorded or an existing
// one removed. No storage access, no side effects - the ledger performs the
// actual write only after a success result here.

use crate::period::Period;
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;

// ============================================================================
// RULE VIOLATIONS
// ============================================================================

/// Business-rule rejection for a proposed ledger mutation.
///
/// These are expected outcomes, not faults: every variant carries the
/// offending period so a human can correct the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// Proposed period is earlier than the student's enrollment month
    BeforeEnrollment { enrollment: Period, proposed: Period },

    /// A payment already exists for this (student, period)
    AlreadyPaid { period: Period },

    /// An earlier month between enrollment and the proposed period is unpaid.
    /// `missing` is always the earliest gap.
    GapInSequence { missing: Period, proposed: Period },

    /// A payment for a later period exists; deletions must proceed from the
    /// most recent period backward. `next` is the earliest later period.
    HasLaterPayments { target: Period, next: Period },
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleViolation::BeforeEnrollment { enrollment, proposed } => write!(
                f,
                "cannot record a payment for {} before the enrollment month {}",
                proposed, enrollment
            ),
            RuleViolation::AlreadyPaid { period } => {
                write!(f, "the month {} is already paid", period)
            }
            RuleViolation::GapInSequence { missing, proposed } => write!(
                f,
                "the month {} must be paid before {}",
                missing, proposed
            ),
            RuleViolation::HasLaterPayments { target, next } => write!(
                f,
                "cannot delete the payment for {} because later payments exist ({}); delete the most recent months first",
                target, next
            ),
        }
    }
}

impl std::error::Error for RuleViolation {}

// ============================================================================
// INSERTION
// ============================================================================

/// Decide whether a payment for `proposed` may be recorded.
///
/// Checks, in order:
/// 1. `proposed` is not earlier than the enrollment month
/// 2. `proposed` is not already paid
/// 3. every month from enrollment up to (excluding) `proposed` is paid -
///    the scan runs ascending so the earliest gap is the one reported
pub fn validate_insertion(
    enrollment_date: NaiveDate,
    existing: &BTreeSet<Period>,
    proposed: Period,
) -> Result<(), RuleViolation> {
    let enrollment = Period {
        year: enrollment_date.year(),
        month: enrollment_date.month(),
    };

    if proposed.index() < enrollment.index() {
        return Err(RuleViolation::BeforeEnrollment {
            enrollment,
            proposed,
        });
    }

    if existing.contains(&proposed) {
        return Err(RuleViolation::AlreadyPaid { period: proposed });
    }

    for index in enrollment.index()..proposed.index() {
        let month = Period::from_index(index);
        if !existing.contains(&month) {
            return Err(RuleViolation::GapInSequence {
                missing: month,
                proposed,
            });
        }
    }

    Ok(())
}

// ============================================================================
// DELETION
// ============================================================================

/// Decide whether the payment for `target` may be deleted.
///
/// Deleting a non-latest payment would leave a later month paid while an
/// earlier one reverts to unpaid, so only the chronologically last payment is
/// removable. The earliest later period is reported for the error message.
pub fn validate_deletion(
    target: Period,
    existing: &BTreeSet<Period>,
) -> Result<(), RuleViolation> {
    if let Some(next) = existing.iter().find(|p| **p > target) {
        return Err(RuleViolation::HasLaterPayments {
            target,
            next: *next,
        });
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment_jan_2024() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn periods(pairs: &[(i32, u32)]) -> BTreeSet<Period> {
        pairs
            .iter()
            .map(|(y, m)| Period::new(*y, *m).unwrap())
            .collect()
    }

    #[test]
    fn test_first_payment_at_enrollment_month_is_valid() {
        let existing = BTreeSet::new();
        let proposed = Period::new(2024, 1).unwrap();

        assert!(validate_insertion(enrollment_jan_2024(), &existing, proposed).is_ok());
    }

    #[test]
    fn test_before_enrollment_always_fails() {
        let proposed = Period::new(2023, 12).unwrap();

        // Fails with an empty ledger
        let result = validate_insertion(enrollment_jan_2024(), &BTreeSet::new(), proposed);
        assert!(matches!(
            result,
            Err(RuleViolation::BeforeEnrollment { .. })
        ));

        // Still fails regardless of existing payments
        let existing = periods(&[(2024, 1), (2024, 2)]);
        let result = validate_insertion(enrollment_jan_2024(), &existing, proposed);
        assert!(matches!(
            result,
            Err(RuleViolation::BeforeEnrollment { .. })
        ));
    }

    #[test]
    fn test_duplicate_period_fails_with_already_paid() {
        let existing = periods(&[(2024, 1)]);
        let proposed = Period::new(2024, 1).unwrap();

        let result = validate_insertion(enrollment_jan_2024(), &existing, proposed);
        assert_eq!(
            result,
            Err(RuleViolation::AlreadyPaid { period: proposed })
        );
    }

    #[test]
    fn test_gap_reports_earliest_missing_month() {
        // 1/2024 and 2/2024 paid, 3/2024 and 4/2024 missing
        let existing = periods(&[(2024, 1), (2024, 2)]);
        let proposed = Period::new(2024, 5).unwrap();

        let result = validate_insertion(enrollment_jan_2024(), &existing, proposed);
        assert_eq!(
            result,
            Err(RuleViolation::GapInSequence {
                missing: Period::new(2024, 3).unwrap(),
                proposed,
            })
        );
    }

    #[test]
    fn test_next_month_in_sequence_is_valid() {
        let existing = periods(&[(2024, 1), (2024, 2), (2024, 3)]);
        let proposed = Period::new(2024, 4).unwrap();

        assert!(validate_insertion(enrollment_jan_2024(), &existing, proposed).is_ok());
    }

    #[test]
    fn test_sequence_crosses_year_boundary() {
        let enrollment = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap();
        let existing = periods(&[(2024, 11), (2024, 12)]);
        let proposed = Period::new(2025, 1).unwrap();

        assert!(validate_insertion(enrollment, &existing, proposed).is_ok());

        // Skipping January reports January, not an arbitrary month
        let result = validate_insertion(enrollment, &existing, Period::new(2025, 2).unwrap());
        assert_eq!(
            result,
            Err(RuleViolation::GapInSequence {
                missing: Period::new(2025, 1).unwrap(),
                proposed: Period::new(2025, 2).unwrap(),
            })
        );
    }

    #[test]
    fn test_contiguous_run_invariant_after_valid_insertions() {
        // Any sequence of accepted insertions leaves an unbroken run starting
        // at the enrollment month
        let enrollment = enrollment_jan_2024();
        let mut existing = BTreeSet::new();

        for month in 1..=6 {
            let p = Period::new(2024, month).unwrap();
            validate_insertion(enrollment, &existing, p).unwrap();
            existing.insert(p);
        }

        let start = Period::from_date(enrollment);
        for (offset, paid) in existing.iter().enumerate() {
            assert_eq!(paid.index(), start.index() + offset as i64);
        }
    }

    #[test]
    fn test_delete_latest_period_is_valid() {
        let existing = periods(&[(2024, 1), (2024, 2), (2024, 3)]);
        let target = Period::new(2024, 3).unwrap();

        assert!(validate_deletion(target, &existing).is_ok());
    }

    #[test]
    fn test_delete_non_latest_reports_immediate_next() {
        let existing = periods(&[(2024, 1), (2024, 2), (2024, 3), (2024, 4)]);
        let target = Period::new(2024, 2).unwrap();

        let result = validate_deletion(target, &existing);
        assert_eq!(
            result,
            Err(RuleViolation::HasLaterPayments {
                target,
                next: Period::new(2024, 3).unwrap(),
            })
        );
    }

    #[test]
    fn test_delete_with_gap_reports_remaining_later_period() {
        // 6/2024 already removed; deleting 5/2024 is still blocked by 7/2024
        let existing = periods(&[(2024, 4), (2024, 5), (2024, 7)]);
        let target = Period::new(2024, 5).unwrap();

        let result = validate_deletion(target, &existing);
        assert_eq!(
            result,
            Err(RuleViolation::HasLaterPayments {
                target,
                next: Period::new(2024, 7).unwrap(),
            })
        );
    }
}
