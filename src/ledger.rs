// 📒 Payment Ledger - Validated mutations over the payment store
// Every write goes through the validator first, then through a storage-level
// guard (the UNIQUE key on insert, a re-read inside the transaction on
// delete) so the check-then-act window can never corrupt the sequence.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::{self, Payment, PaymentMethod};
use crate::period::Period;
use crate::validator::{validate_deletion, validate_insertion, RuleViolation};

// ============================================================================
// ERRORS
// ============================================================================

/// Failure of a ledger operation.
///
/// `Rule` carries an expected business rejection; `Forbidden` is the
/// authorization gate; the not-found variants signal a stale reference.
/// `Storage` is the only variant that represents a fault.
#[derive(Debug)]
pub enum LedgerError {
    Rule(RuleViolation),
    Forbidden,
    StudentNotFound(String),
    PaymentNotFound(String),
    Storage(anyhow::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Rule(violation) => write!(f, "{}", violation),
            LedgerError::Forbidden => {
                write!(f, "the requesting teacher does not own this student")
            }
            LedgerError::StudentNotFound(id) => write!(f, "student not found: {}", id),
            LedgerError::PaymentNotFound(id) => write!(f, "payment not found: {}", id),
            LedgerError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Rule(violation) => Some(violation),
            LedgerError::Storage(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<RuleViolation> for LedgerError {
    fn from(violation: RuleViolation) -> Self {
        LedgerError::Rule(violation)
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Storage(e)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.into())
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// A payment as submitted by the caller. The teacher id comes from the
/// authenticated request, never from the body.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub student_id: String,
    pub period: Period,
    pub paid_on: NaiveDate,
    /// Amount as entered; deliberately NOT clamped to the student's tuition
    /// so partial and adjusted payments stay representable
    pub amount: f64,
    pub method: PaymentMethod,
    pub note: Option<String>,
}

/// Optional filters for payment listings
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub student_id: Option<String>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Record a tuition payment.
///
/// Order of checks: student exists, requesting teacher owns the student,
/// sequential rules pass. The insert itself runs under the (student, period)
/// UNIQUE key, so a concurrent request that won the race between validation
/// and write surfaces as the same `AlreadyPaid` rejection the pre-check
/// would have produced.
pub fn record_payment(
    conn: &Connection,
    teacher_id: &str,
    new_payment: NewPayment,
) -> Result<Payment, LedgerError> {
    let student = db::get_student(conn, &new_payment.student_id)?
        .ok_or_else(|| LedgerError::StudentNotFound(new_payment.student_id.clone()))?;

    if student.teacher_id != teacher_id {
        return Err(LedgerError::Forbidden);
    }

    let existing = db::paid_periods(conn, &student.id)?;
    validate_insertion(student.enrolled_on, &existing, new_payment.period)?;

    let payment = Payment {
        id: uuid::Uuid::new_v4().to_string(),
        student_id: student.id.clone(),
        teacher_id: teacher_id.to_string(),
        period: new_payment.period,
        paid_on: new_payment.paid_on,
        amount: new_payment.amount,
        method: new_payment.method,
        note: new_payment.note,
    };

    let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;

    if !db::insert_payment(&tx, &payment)? {
        return Err(LedgerError::Rule(RuleViolation::AlreadyPaid {
            period: payment.period,
        }));
    }

    let event = db::Event::new(
        "payment_recorded",
        "payment",
        &payment.id,
        serde_json::json!({
            "student_id": payment.student_id,
            "period": payment.period,
            "amount": payment.amount,
            "method": payment.method.as_str(),
        }),
        teacher_id,
    );
    db::insert_event(&tx, &event)?;

    tx.commit().map_err(anyhow::Error::from)?;

    Ok(payment)
}

/// Delete a payment.
///
/// The later-payments precondition is re-read inside the delete transaction,
/// not taken from any earlier validation: a payment recorded between check
/// and commit still blocks the delete.
pub fn delete_payment(
    conn: &Connection,
    teacher_id: &str,
    payment_id: &str,
) -> Result<(), LedgerError> {
    let payment = db::get_payment(conn, payment_id)?
        .ok_or_else(|| LedgerError::PaymentNotFound(payment_id.to_string()))?;

    if payment.teacher_id != teacher_id {
        return Err(LedgerError::Forbidden);
    }

    let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;

    if let Some(next) = db::earliest_later_period(&tx, &payment.student_id, payment.period)? {
        return Err(LedgerError::Rule(RuleViolation::HasLaterPayments {
            target: payment.period,
            next,
        }));
    }

    if db::delete_payment_row(&tx, payment_id)? == 0 {
        return Err(LedgerError::PaymentNotFound(payment_id.to_string()));
    }

    let event = db::Event::new(
        "payment_deleted",
        "payment",
        payment_id,
        serde_json::json!({
            "student_id": payment.student_id,
            "period": payment.period,
        }),
        teacher_id,
    );
    db::insert_event(&tx, &event)?;

    tx.commit().map_err(anyhow::Error::from)?;

    Ok(())
}

/// Check whether a deletion would currently be accepted, without deleting.
/// Advisory only - `delete_payment` re-verifies at commit time.
pub fn validate_payment_deletion(
    conn: &Connection,
    teacher_id: &str,
    payment_id: &str,
) -> Result<(), LedgerError> {
    let payment = db::get_payment(conn, payment_id)?
        .ok_or_else(|| LedgerError::PaymentNotFound(payment_id.to_string()))?;

    if payment.teacher_id != teacher_id {
        return Err(LedgerError::Forbidden);
    }

    let existing = db::paid_periods(conn, &payment.student_id)?;
    validate_deletion(payment.period, &existing)?;

    Ok(())
}

/// List a teacher's payments, newest period first, with optional filters
pub fn list_payments(
    conn: &Connection,
    teacher_id: &str,
    filter: &PaymentFilter,
) -> Result<Vec<Payment>, LedgerError> {
    let payments = db::payments_for_teacher(conn, teacher_id)?
        .into_iter()
        .filter(|p| {
            filter
                .student_id
                .as_ref()
                .map_or(true, |sid| &p.student_id == sid)
        })
        .filter(|p| filter.month.map_or(true, |m| p.period.month == m))
        .filter(|p| filter.year.map_or(true, |y| p.period.year == y))
        .collect();

    Ok(payments)
}

// ============================================================================
// TESTS
// ============================================================================
