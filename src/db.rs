use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::period::Period;

// ============================================================================
// PAYMENT METHOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }

    /// Parse a stored method; unknown values collapse to `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "cash" => PaymentMethod::Cash,
            "transfer" => PaymentMethod::Transfer,
            "card" => PaymentMethod::Card,
            _ => PaymentMethod::Other,
        }
    }
}

// ============================================================================
// STUDENT (enrollment record)
// ============================================================================

/// A student's enrollment record. The enrollment date anchors the sequential
/// payment rules: no period before the enrollment month is ever payable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub teacher_id: String,
    pub full_name: String,
    pub username: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub monthly_fee: f64,
    pub enrolled_on: NaiveDate,
    /// Day of month the tuition is nominally due (1-28), informational only
    pub billing_day: u32,
    pub active: bool,
}

// ============================================================================
// PAYMENT (ledger record)
// ============================================================================

/// One recorded tuition payment. At most one exists per (student, period);
/// the database enforces this with a UNIQUE constraint.
///
/// Payments are created through the validator, never updated in place, and
/// deleted only when no later period exists for the same student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    /// Denormalized owner, checked on every mutating call
    pub teacher_id: String,
    pub period: Period,
    pub paid_on: NaiveDate,
    pub amount: f64,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================================================
// EVENT (audit trail)
// ============================================================================

/// Audit-trail entry: every ledger and roster mutation appends one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            username TEXT UNIQUE NOT NULL,
            guardian_name TEXT NOT NULL,
            guardian_phone TEXT NOT NULL,
            monthly_fee REAL NOT NULL CHECK (monthly_fee >= 0),
            enrolled_on TEXT NOT NULL,
            billing_day INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Payments Table
    // The UNIQUE key on (student_id, period) is the storage-level guard that
    // settles concurrent inserts for the same month: exactly one wins.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL REFERENCES students(id),
            teacher_id TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            period_month INTEGER NOT NULL CHECK (period_month BETWEEN 1 AND 12),
            paid_on TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            method TEXT NOT NULL,
            note TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (student_id, period_year, period_month)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_teacher ON students(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_teacher ON payments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_period ON payments(period_year, period_month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// STUDENT QUERIES
// ============================================================================

pub fn insert_student(conn: &Connection, student: &Student) -> Result<()> {
    conn.execute(
        "INSERT INTO students (
            id, teacher_id, full_name, username, guardian_name, guardian_phone,
            monthly_fee, enrolled_on, billing_day, active
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            student.id,
            student.teacher_id,
            student.full_name,
            student.username,
            student.guardian_name,
            student.guardian_phone,
            student.monthly_fee,
            student.enrolled_on.to_string(),
            student.billing_day,
            student.active,
        ],
    )?;

    Ok(())
}

fn map_student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let enrolled_on_str: String = row.get(7)?;
    let enrolled_on = enrolled_on_str
        .parse::<NaiveDate>()
        .map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(Student {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        full_name: row.get(2)?,
        username: row.get(3)?,
        guardian_name: row.get(4)?,
        guardian_phone: row.get(5)?,
        monthly_fee: row.get(6)?,
        enrolled_on,
        billing_day: row.get(8)?,
        active: row.get(9)?,
    })
}

const STUDENT_COLUMNS: &str = "id, teacher_id, full_name, username, guardian_name, \
     guardian_phone, monthly_fee, enrolled_on, billing_day, active";

pub fn get_student(conn: &Connection, id: &str) -> Result<Option<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE id = ?1",
        STUDENT_COLUMNS
    ))?;

    let student = stmt.query_row(params![id], map_student_row).optional()?;

    Ok(student)
}

pub fn list_students(
    conn: &Connection,
    teacher_id: &str,
    active_only: bool,
) -> Result<Vec<Student>> {
    let sql = if active_only {
        format!(
            "SELECT {} FROM students WHERE teacher_id = ?1 AND active = 1 ORDER BY full_name",
            STUDENT_COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM students WHERE teacher_id = ?1 ORDER BY full_name",
            STUDENT_COLUMNS
        )
    };

    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params![teacher_id], map_student_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

pub fn all_active_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE active = 1 ORDER BY full_name",
        STUDENT_COLUMNS
    ))?;

    let students = stmt
        .query_map([], map_student_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

/// Returns the number of rows changed (0 when the student does not exist)
pub fn update_student_active(conn: &Connection, id: &str, active: bool) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE students SET active = ?1 WHERE id = ?2",
        params![active, id],
    )?;

    Ok(changed)
}

// ============================================================================
// PAYMENT QUERIES
// ============================================================================

const PAYMENT_COLUMNS: &str = "id, student_id, teacher_id, period_year, period_month, \
     paid_on, amount, method, note";

fn map_payment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    let year: i32 = row.get(3)?;
    let month: u32 = row.get(4)?;
    let paid_on_str: String = row.get(5)?;
    let paid_on = paid_on_str
        .parse::<NaiveDate>()
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let method_str: String = row.get(7)?;

    Ok(Payment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        teacher_id: row.get(2)?,
        period: Period { year, month },
        paid_on,
        amount: row.get(6)?,
        method: PaymentMethod::parse(&method_str),
        note: row.get(8)?,
    })
}

/// Insert a payment row. Returns `false` when the (student, period) key is
/// already taken - a concurrent insert won the race between validation and
/// this write. The caller remaps that to the same business error as the
/// pre-check.
pub fn insert_payment(conn: &Connection, payment: &Payment) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO payments (
            id, student_id, teacher_id, period_year, period_month,
            paid_on, amount, method, note
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            payment.id,
            payment.student_id,
            payment.teacher_id,
            payment.period.year,
            payment.period.month,
            payment.paid_on.to_string(),
            payment.amount,
            payment.method.as_str(),
            payment.note,
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments WHERE id = ?1",
        PAYMENT_COLUMNS
    ))?;

    let payment = stmt.query_row(params![id], map_payment_row).optional()?;

    Ok(payment)
}

/// Returns the number of rows deleted (0 when the payment does not exist)
pub fn delete_payment_row(conn: &Connection, id: &str) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM payments WHERE id = ?1", params![id])?;

    Ok(deleted)
}

/// All periods currently paid for a student, as a set
pub fn paid_periods(conn: &Connection, student_id: &str) -> Result<BTreeSet<Period>> {
    let mut stmt = conn.prepare(
        "SELECT period_year, period_month FROM payments
         WHERE student_id = ?1
         ORDER BY period_year ASC, period_month ASC",
    )?;

    let periods = stmt
        .query_map(params![student_id], |row| {
            Ok(Period {
                year: row.get(0)?,
                month: row.get(1)?,
            })
        })?
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(periods)
}

/// The earliest paid period strictly after `after` for this student, if any.
/// Read immediately before a delete commits, so a payment recorded after the
/// deletion pre-check still blocks the delete.
pub fn earliest_later_period(
    conn: &Connection,
    student_id: &str,
    after: Period,
) -> Result<Option<Period>> {
    let mut stmt = conn.prepare(
        "SELECT period_year, period_month FROM payments
         WHERE student_id = ?1
           AND (period_year > ?2 OR (period_year = ?2 AND period_month > ?3))
         ORDER BY period_year ASC, period_month ASC
         LIMIT 1",
    )?;

    let period = stmt
        .query_row(params![student_id, after.year, after.month], |row| {
            Ok(Period {
                year: row.get(0)?,
                month: row.get(1)?,
            })
        })
        .optional()?;

    Ok(period)
}

pub fn payment_for_period(
    conn: &Connection,
    student_id: &str,
    period: Period,
) -> Result<Option<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments
         WHERE student_id = ?1 AND period_year = ?2 AND period_month = ?3",
        PAYMENT_COLUMNS
    ))?;

    let payment = stmt
        .query_row(
            params![student_id, period.year, period.month],
            map_payment_row,
        )
        .optional()?;

    Ok(payment)
}

/// All payments owned by a teacher, newest period first
pub fn payments_for_teacher(conn: &Connection, teacher_id: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments
         WHERE teacher_id = ?1
         ORDER BY period_year DESC, period_month DESC",
        PAYMENT_COLUMNS
    ))?;

    let payments = stmt
        .query_map(params![teacher_id], map_payment_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payments)
}

/// All payments for one student, oldest period first
pub fn payments_for_student(conn: &Connection, student_id: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments
         WHERE student_id = ?1
         ORDER BY period_year ASC, period_month ASC",
        PAYMENT_COLUMNS
    ))?;

    let payments = stmt
        .query_map(params![student_id], map_payment_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payments)
}

/// Sum of all amounts collected for one period, across all teachers
pub fn collected_for_period(conn: &Connection, period: Period) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE period_year = ?1 AND period_month = ?2",
        params![period.year, period.month],
        |row| row.get(0),
    )?;

    Ok(total)
}

// ============================================================================
// EVENT QUERIES
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_student(id: &str, teacher_id: &str, enrolled_on: &str) -> Student {
        Student {
            id: id.to_string(),
            teacher_id: teacher_id.to_string(),
            full_name: "Test Student".to_string(),
            username: format!("test{}", id),
            guardian_name: "Test Guardian".to_string(),
            guardian_phone: "555-0100".to_string(),
            monthly_fee: 1200.0,
            enrolled_on: enrolled_on.parse().unwrap(),
            billing_day: 5,
            active: true,
        }
    }

    fn create_test_payment(id: &str, student_id: &str, teacher_id: &str, period: Period) -> Payment {
        Payment {
            id: id.to_string(),
            student_id: student_id.to_string(),
            teacher_id: teacher_id.to_string(),
            period,
            paid_on: "2024-01-05".parse().unwrap(),
            amount: 1200.0,
            method: PaymentMethod::Cash,
            note: None,
        }
    }

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_student_round_trip() {
        let conn = open_test_db();
        let student = create_test_student("s1", "t1", "2024-01-01");

        insert_student(&conn, &student).unwrap();

        let loaded = get_student(&conn, "s1").unwrap().unwrap();
        assert_eq!(loaded.full_name, student.full_name);
        assert_eq!(loaded.enrolled_on, student.enrolled_on);
        assert_eq!(loaded.monthly_fee, student.monthly_fee);
        assert!(loaded.active);

        assert!(get_student(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_student_active() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();

        assert_eq!(update_student_active(&conn, "s1", false).unwrap(), 1);
        assert!(!get_student(&conn, "s1").unwrap().unwrap().active);

        assert_eq!(update_student_active(&conn, "missing", false).unwrap(), 0);
    }

    #[test]
    fn test_unique_period_constraint() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();

        let period = Period::new(2024, 1).unwrap();
        let first = create_test_payment("p1", "s1", "t1", period);
        let second = create_test_payment("p2", "s1", "t1", period);

        assert!(insert_payment(&conn, &first).unwrap());
        // Same (student, period) pair: the constraint rejects it
        assert!(!insert_payment(&conn, &second).unwrap());

        // A different student may pay the same period
        insert_student(&conn, &create_test_student("s2", "t1", "2024-01-01")).unwrap();
        let other = create_test_payment("p3", "s2", "t1", period);
        assert!(insert_payment(&conn, &other).unwrap());
    }

    #[test]
    fn test_paid_periods_set() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();

        for (i, month) in [1u32, 2, 3].iter().enumerate() {
            let p = create_test_payment(
                &format!("p{}", i),
                "s1",
                "t1",
                Period::new(2024, *month).unwrap(),
            );
            insert_payment(&conn, &p).unwrap();
        }

        let periods = paid_periods(&conn, "s1").unwrap();
        assert_eq!(periods.len(), 3);
        assert!(periods.contains(&Period::new(2024, 2).unwrap()));
        assert!(!periods.contains(&Period::new(2024, 4).unwrap()));
    }

    #[test]
    fn test_earliest_later_period() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();

        for (id, year, month) in [("p1", 2024, 11u32), ("p2", 2024, 12), ("p3", 2025, 1)] {
            let p = create_test_payment(id, "s1", "t1", Period::new(year, month).unwrap());
            insert_payment(&conn, &p).unwrap();
        }

        // Year boundary: the earliest period after 12/2024 is 1/2025
        let next = earliest_later_period(&conn, "s1", Period::new(2024, 12).unwrap()).unwrap();
        assert_eq!(next, Some(Period::new(2025, 1).unwrap()));

        let next = earliest_later_period(&conn, "s1", Period::new(2024, 10).unwrap()).unwrap();
        assert_eq!(next, Some(Period::new(2024, 11).unwrap()));

        let next = earliest_later_period(&conn, "s1", Period::new(2025, 1).unwrap()).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_payment_ordering() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();

        for (id, month) in [("p1", 1u32), ("p2", 2), ("p3", 3)] {
            let p = create_test_payment(id, "s1", "t1", Period::new(2024, month).unwrap());
            insert_payment(&conn, &p).unwrap();
        }

        let newest_first = payments_for_teacher(&conn, "t1").unwrap();
        assert_eq!(newest_first.len(), 3);
        assert_eq!(newest_first[0].period, Period::new(2024, 3).unwrap());

        let oldest_first = payments_for_student(&conn, "s1").unwrap();
        assert_eq!(oldest_first[0].period, Period::new(2024, 1).unwrap());

        assert!(payments_for_teacher(&conn, "t2").unwrap().is_empty());
    }

    #[test]
    fn test_collected_for_period() {
        let conn = open_test_db();
        insert_student(&conn, &create_test_student("s1", "t1", "2024-01-01")).unwrap();
        insert_student(&conn, &create_test_student("s2", "t1", "2024-01-01")).unwrap();

        let period = Period::new(2024, 1).unwrap();
        let mut a = create_test_payment("p1", "s1", "t1", period);
        a.amount = 1000.0;
        let mut b = create_test_payment("p2", "s2", "t1", period);
        b.amount = 1500.0;
        insert_payment(&conn, &a).unwrap();
        insert_payment(&conn, &b).unwrap();

        assert_eq!(collected_for_period(&conn, period).unwrap(), 2500.0);
        assert_eq!(
            collected_for_period(&conn, Period::new(2024, 2).unwrap()).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_event_log() {
        let conn = open_test_db();

        let event = Event::new(
            "payment_recorded",
            "payment",
            "p1",
            serde_json::json!({"amount": 1200.0}),
            "t1",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "payment", "p1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_recorded");
        assert_eq!(events[0].actor, "t1");
    }
}
