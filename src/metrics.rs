// 📊 Dashboard Reducers - Collection status and business metrics
// Read-only aggregations over the roster and the ledger. No rules live
// here; everything below is a straightforward reduce.

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{self, Student};
use crate::period::Period;

// ============================================================================
// COLLECTION STATUS (per teacher)
// ============================================================================

/// Slim student summary for dashboard lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub monthly_fee: f64,
    pub guardian_name: String,
    pub guardian_phone: String,
}

impl From<Student> for StudentSummary {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            full_name: student.full_name,
            username: student.username,
            monthly_fee: student.monthly_fee,
            guardian_name: student.guardian_name,
            guardian_phone: student.guardian_phone,
        }
    }
}

/// A teacher's active students split into paid and pending for one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub period: Period,
    pub total_active: usize,
    pub paid: Vec<StudentSummary>,
    pub pending: Vec<StudentSummary>,
    pub total_collected: f64,
    pub total_pending: f64,
}

/// Split a teacher's active students into paid/pending for `period`
pub fn collection_status(
    conn: &Connection,
    teacher_id: &str,
    period: Period,
) -> Result<CollectionStatus> {
    let students = db::list_students(conn, teacher_id, true)?;

    let mut paid = Vec::new();
    let mut pending = Vec::new();

    for student in students {
        if db::payment_for_period(conn, &student.id, period)?.is_some() {
            paid.push(StudentSummary::from(student));
        } else {
            pending.push(StudentSummary::from(student));
        }
    }

    let total_collected = paid.iter().map(|s| s.monthly_fee).sum();
    let total_pending = pending.iter().map(|s| s.monthly_fee).sum();

    Ok(CollectionStatus {
        period,
        total_active: paid.len() + pending.len(),
        paid,
        pending,
        total_collected,
        total_pending,
    })
}

// ============================================================================
// BUSINESS METRICS (whole business)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessMetrics {
    pub period: Period,
    pub active_students: usize,
    pub teachers: usize,
    pub expected_tuition: f64,
    pub collected: f64,
    pub outstanding: f64,
    pub percent_collected: f64,
}

/// Business-wide totals for one period, across all teachers
pub fn business_metrics(conn: &Connection, period: Period) -> Result<BusinessMetrics> {
    let students = db::all_active_students(conn)?;

    let active_students = students.len();
    let teachers = students
        .iter()
        .map(|s| s.teacher_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();
    let expected_tuition: f64 = students.iter().map(|s| s.monthly_fee).sum();

    let collected = db::collected_for_period(conn, period)?;
    let outstanding = expected_tuition - collected;
    let percent_collected = if expected_tuition > 0.0 {
        (collected / expected_tuition) * 100.0
    } else {
        0.0
    };

    Ok(BusinessMetrics {
        period,
        active_students,
        teachers,
        expected_tuition,
        collected,
        outstanding,
        percent_collected,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::ledger::{record_payment, NewPayment};
    use crate::roster::{enroll_student, set_student_active, NewStudent};

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn enroll(conn: &Connection, teacher_id: &str, name: &str, fee: f64) -> Student {
        enroll_student(
            conn,
            NewStudent {
                teacher_id: teacher_id.to_string(),
                full_name: name.to_string(),
                guardian_name: "Guardian".to_string(),
                guardian_phone: "555-0100".to_string(),
                monthly_fee: fee,
                enrolled_on: "2024-01-01".parse().unwrap(),
                billing_day: 5,
            },
        )
        .unwrap()
    }

    fn pay(conn: &Connection, teacher_id: &str, student_id: &str, amount: f64) {
        record_payment(
            conn,
            teacher_id,
            NewPayment {
                student_id: student_id.to_string(),
                period: Period::new(2024, 1).unwrap(),
                paid_on: "2024-01-05".parse().unwrap(),
                amount,
                method: crate::db::PaymentMethod::Cash,
                note: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_collection_status_splits_paid_and_pending() {
        let conn = open_test_db();
        let a = enroll(&conn, "t1", "Ana Garcia", 1000.0);
        let b = enroll(&conn, "t1", "Beto Ruiz", 1500.0);
        let _c = enroll(&conn, "t2", "Carla Mora", 2000.0); // other teacher

        pay(&conn, "t1", &a.id, 1000.0);

        let status = collection_status(&conn, "t1", Period::new(2024, 1).unwrap()).unwrap();

        assert_eq!(status.total_active, 2);
        assert_eq!(status.paid.len(), 1);
        assert_eq!(status.paid[0].id, a.id);
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].id, b.id);
        assert_eq!(status.total_collected, 1000.0);
        assert_eq!(status.total_pending, 1500.0);
    }

    #[test]
    fn test_collection_status_ignores_inactive_students() {
        let conn = open_test_db();
        let a = enroll(&conn, "t1", "Ana Garcia", 1000.0);
        set_student_active(&conn, "t1", &a.id, false).unwrap();

        let status = collection_status(&conn, "t1", Period::new(2024, 1).unwrap()).unwrap();
        assert_eq!(status.total_active, 0);
        assert!(status.paid.is_empty());
        assert!(status.pending.is_empty());
    }

    #[test]
    fn test_business_metrics() {
        let conn = open_test_db();
        let a = enroll(&conn, "t1", "Ana Garcia", 1000.0);
        let _b = enroll(&conn, "t1", "Beto Ruiz", 1500.0);
        let _c = enroll(&conn, "t2", "Carla Mora", 1500.0);

        // A partial payment counts what was actually collected
        pay(&conn, "t1", &a.id, 800.0);

        let metrics = business_metrics(&conn, Period::new(2024, 1).unwrap()).unwrap();

        assert_eq!(metrics.active_students, 3);
        assert_eq!(metrics.teachers, 2);
        assert_eq!(metrics.expected_tuition, 4000.0);
        assert_eq!(metrics.collected, 800.0);
        assert_eq!(metrics.outstanding, 3200.0);
        assert!((metrics.percent_collected - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_business_metrics_empty_roster() {
        let conn = open_test_db();

        let metrics = business_metrics(&conn, Period::new(2024, 1).unwrap()).unwrap();
        assert_eq!(metrics.active_students, 0);
        assert_eq!(metrics.percent_collected, 0.0);
    }
}
