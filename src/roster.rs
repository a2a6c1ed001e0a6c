// 🎓 Student Roster - Enrollment records
// Students are the anchor for the payment rules: the enrollment date decides
// the first payable period, the monthly fee feeds the dashboard reducers,
// and the owning teacher gates every mutation.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::{self, Student};
use crate::ledger::LedgerError;

// ============================================================================
// ENROLLMENT
// ============================================================================

/// Roster entry as submitted on enrollment (also the CSV row shape for
/// roster imports)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub teacher_id: String,
    pub full_name: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub monthly_fee: f64,
    pub enrolled_on: NaiveDate,
    pub billing_day: u32,
}

/// Login username: first name lowercased plus three random digits.
/// Credential issuance itself happens at the identity provider, not here.
fn generate_username(full_name: &str) -> String {
    let first = full_name
        .split_whitespace()
        .next()
        .unwrap_or("student")
        .to_lowercase();
    let suffix = rand::thread_rng().gen_range(100..1000);
    format!("{}{}", first, suffix)
}

fn username_taken(conn: &Connection, username: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Enroll a new student and append the audit event
pub fn enroll_student(conn: &Connection, new_student: NewStudent) -> Result<Student> {
    if new_student.monthly_fee < 0.0 {
        bail!("monthly fee must be non-negative");
    }
    if !(1..=28).contains(&new_student.billing_day) {
        bail!("billing day must be between 1 and 28");
    }

    // Regenerate on the rare username collision
    let mut username = generate_username(&new_student.full_name);
    for _ in 0..5 {
        if !username_taken(conn, &username)? {
            break;
        }
        username = generate_username(&new_student.full_name);
    }

    let student = Student {
        id: uuid::Uuid::new_v4().to_string(),
        teacher_id: new_student.teacher_id,
        full_name: new_student.full_name,
        username,
        guardian_name: new_student.guardian_name,
        guardian_phone: new_student.guardian_phone,
        monthly_fee: new_student.monthly_fee,
        enrolled_on: new_student.enrolled_on,
        billing_day: new_student.billing_day,
        active: true,
    };

    db::insert_student(conn, &student)?;

    let event = db::Event::new(
        "student_enrolled",
        "student",
        &student.id,
        serde_json::json!({
            "full_name": student.full_name,
            "monthly_fee": student.monthly_fee,
            "enrolled_on": student.enrolled_on,
        }),
        &student.teacher_id,
    );
    db::insert_event(conn, &event)?;

    Ok(student)
}

/// Activate or deactivate a student. Same ownership gate as ledger mutations.
pub fn set_student_active(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
    active: bool,
) -> Result<(), LedgerError> {
    let student = db::get_student(conn, student_id)?
        .ok_or_else(|| LedgerError::StudentNotFound(student_id.to_string()))?;

    if student.teacher_id != teacher_id {
        return Err(LedgerError::Forbidden);
    }

    db::update_student_active(conn, student_id, active)?;

    let event_type = if active {
        "student_reactivated"
    } else {
        "student_deactivated"
    };
    let event = db::Event::new(
        event_type,
        "student",
        student_id,
        serde_json::json!({}),
        teacher_id,
    );
    db::insert_event(conn, &event)?;

    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Load roster rows from a CSV file (one student per row, header required)
pub fn load_roster_csv(csv_path: &Path) -> Result<Vec<NewStudent>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open roster CSV")?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: NewStudent = result.context("Failed to deserialize roster row")?;
        rows.push(row);
    }

    Ok(rows)
}

/// Enroll every student in a roster CSV. Returns the number enrolled.
pub fn import_roster(conn: &Connection, csv_path: &Path) -> Result<usize> {
    let rows = load_roster_csv(csv_path)?;

    let mut enrolled = 0;
    for row in rows {
        enroll_student(conn, row)?;
        enrolled += 1;
    }

    println!("✓ Enrolled: {} students", enrolled);

    Ok(enrolled)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn create_test_enrollment(teacher_id: &str, full_name: &str) -> NewStudent {
        NewStudent {
            teacher_id: teacher_id.to_string(),
            full_name: full_name.to_string(),
            guardian_name: "Test Guardian".to_string(),
            guardian_phone: "555-0100".to_string(),
            monthly_fee: 1200.0,
            enrolled_on: "2024-01-15".parse().unwrap(),
            billing_day: 5,
        }
    }

    #[test]
    fn test_enroll_student() {
        let conn = open_test_db();

        let student =
            enroll_student(&conn, create_test_enrollment("t1", "Maria Lopez")).unwrap();

        assert!(student.active);
        assert!(student.username.starts_with("maria"));
        assert_eq!(student.username.len(), "maria".len() + 3);

        let loaded = db::get_student(&conn, &student.id).unwrap().unwrap();
        assert_eq!(loaded.full_name, "Maria Lopez");

        let events = db::get_events_for_entity(&conn, "student", &student.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "student_enrolled");
    }

    #[test]
    fn test_enroll_rejects_negative_fee() {
        let conn = open_test_db();

        let mut enrollment = create_test_enrollment("t1", "Maria Lopez");
        enrollment.monthly_fee = -10.0;
        assert!(enroll_student(&conn, enrollment).is_err());

        let mut enrollment = create_test_enrollment("t1", "Maria Lopez");
        enrollment.billing_day = 31;
        assert!(enroll_student(&conn, enrollment).is_err());
    }

    #[test]
    fn test_usernames_stay_unique_for_same_first_name() {
        let conn = open_test_db();

        let mut usernames = std::collections::HashSet::new();
        for _ in 0..10 {
            let student =
                enroll_student(&conn, create_test_enrollment("t1", "Ana Garcia")).unwrap();
            assert!(usernames.insert(student.username.clone()));
        }
    }

    #[test]
    fn test_set_student_active_checks_ownership() {
        let conn = open_test_db();
        let student = enroll_student(&conn, create_test_enrollment("t1", "Maria Lopez")).unwrap();

        let result = set_student_active(&conn, "t2", &student.id, false);
        assert!(matches!(result, Err(LedgerError::Forbidden)));

        set_student_active(&conn, "t1", &student.id, false).unwrap();
        assert!(!db::get_student(&conn, &student.id).unwrap().unwrap().active);

        set_student_active(&conn, "t1", &student.id, true).unwrap();
        assert!(db::get_student(&conn, &student.id).unwrap().unwrap().active);

        let result = set_student_active(&conn, "t1", "ghost", false);
        assert!(matches!(result, Err(LedgerError::StudentNotFound(_))));
    }

    #[test]
    fn test_import_roster_csv() {
        let conn = open_test_db();

        let csv_path = std::env::temp_dir().join(format!(
            "tuition-roster-{}.csv",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &csv_path,
            "teacher_id,full_name,guardian_name,guardian_phone,monthly_fee,enrolled_on,billing_day\n\
             t1,Maria Lopez,Rosa Lopez,555-0101,1200,2024-01-15,5\n\
             t1,Juan Perez,Luis Perez,555-0102,950.5,2024-02-01,10\n",
        )
        .unwrap();

        let enrolled = import_roster(&conn, &csv_path).unwrap();
        assert_eq!(enrolled, 2);

        let students = db::list_students(&conn, "t1", true).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].full_name, "Juan Perez");
        assert_eq!(students[1].monthly_fee, 1200.0);

        let _ = std::fs::remove_file(&csv_path);
    }
}
