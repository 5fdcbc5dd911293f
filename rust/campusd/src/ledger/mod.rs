//! Ledger operations. Each function is one unit of work against the
//! workspace database: it checks the caller's capability, mutates source
//! rows, recomputes whatever derived values those rows own, and appends
//! notifications, all inside one transaction where more than one row moves.

pub mod assessment;
pub mod attendance;
pub mod catalog;
pub mod complaints;
pub mod dashboard;
pub mod feedback;
pub mod fees;
pub mod library;
pub mod notices;
pub mod notify;
pub mod timetable;

use crate::calc;
use crate::error::{LedgerError, LedgerResult};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

/// One entry of a best-effort batch: the parsed value, or why it could not
/// be parsed. Unparseable entries are skipped and reported; the rest commit.
pub type BatchEntry<T> = Result<T, String>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub student_id: String,
    pub code: &'static str,
    pub message: String,
}

impl Rejection {
    pub(crate) fn new(student_id: &str, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            student_id: student_id.to_string(),
            code,
            message: message.into(),
        }
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn now_ts() -> String {
    calc::format_ts(Utc::now())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub user_id: String,
    pub roll_number: String,
    pub name: String,
}

/// Students of one (department, year, section), in roll-number order.
pub(crate) fn roster(
    conn: &Connection,
    department_id: &str,
    year: i64,
    section: &str,
) -> LedgerResult<Vec<RosterStudent>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, roll_number, name
         FROM students
         WHERE department_id = ? AND year = ? AND section = ?
         ORDER BY roll_number",
    )?;
    let rows = stmt
        .query_map((department_id, year, section), |r| {
            Ok(RosterStudent {
                id: r.get(0)?,
                user_id: r.get(1)?,
                roll_number: r.get(2)?,
                name: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn require_row(
    conn: &Connection,
    table: &str,
    id: &str,
    entity: &'static str,
) -> LedgerResult<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?;
    if found.is_some() {
        Ok(())
    } else {
        Err(LedgerError::NotFound { entity })
    }
}

pub(crate) fn validate_year(year: i64) -> LedgerResult<()> {
    if (1..=4).contains(&year) {
        Ok(())
    } else {
        Err(LedgerError::bad_params("year must be in 1..=4"))
    }
}

pub(crate) fn validate_period(period: i64) -> LedgerResult<()> {
    if (1..=8).contains(&period) {
        Ok(())
    } else {
        Err(LedgerError::bad_params("period must be in 1..=8"))
    }
}

pub(crate) fn validate_section(section: &str) -> LedgerResult<String> {
    let s = section.trim().to_ascii_uppercase();
    if s.is_empty() || s.len() > 10 {
        return Err(LedgerError::bad_params("section must be 1..=10 characters"));
    }
    Ok(s)
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::auth::{resolve_caller, Caller};
    use crate::db;
    use rusqlite::Connection;

    pub struct Fixture {
        pub conn: Connection,
        pub department_id: String,
        pub subject_id: String,
        pub management: Caller,
        pub teacher: Caller,
        pub co_teacher: Caller,
        pub students: Vec<Caller>,
    }

    fn user(conn: &Connection, id: &str, role: &str) {
        conn.execute(
            "INSERT INTO users(id, username, email, role, is_active, created_at)
             VALUES(?, ?, ?, ?, 1, '2024-01-01T00:00:00Z')",
            (id, id, format!("{}@example.edu", id), role),
        )
        .expect("user");
    }

    /// One department, one subject taught by two staff, and a roster of
    /// `n_students` in year 1 section A.
    pub fn fixture(n_students: usize) -> Fixture {
        let conn = db::open_in_memory().expect("db");
        conn.execute(
            "INSERT INTO departments(id, code, name) VALUES('d1', 'CSE', 'Computer Science')",
            [],
        )
        .expect("department");
        conn.execute(
            "INSERT INTO subjects(id, code, name, department_id, year, semester, credits, is_lab)
             VALUES('sub1', 'CS101', 'Programming', 'd1', 1, 1, 3, 0)",
            [],
        )
        .expect("subject");

        user(&conn, "u-mgmt", "management");
        conn.execute(
            "INSERT INTO management(id, user_id, employee_id, name, designation)
             VALUES('m1', 'u-mgmt', 'M001', 'Registrar', 'Registrar')",
            [],
        )
        .expect("management");

        for (uid, sid, emp, name) in [
            ("u-t1", "t1", "E001", "Teacher One"),
            ("u-t2", "t2", "E002", "Teacher Two"),
        ] {
            user(&conn, uid, "staff");
            conn.execute(
                "INSERT INTO staff(id, user_id, employee_id, name, department_id, designation)
                 VALUES(?, ?, ?, ?, 'd1', 'Lecturer')",
                (sid, uid, emp, name),
            )
            .expect("staff");
            conn.execute(
                "INSERT INTO staff_assignments(id, staff_id, subject_id, year, department_id, assigned_date)
                 VALUES(?, ?, 'sub1', 1, 'd1', '2024-01-01')",
                (format!("a-{}", sid), sid),
            )
            .expect("assignment");
        }

        let mut students = Vec::new();
        for i in 0..n_students {
            let uid = format!("u-s{}", i + 1);
            let sid = format!("s{}", i + 1);
            user(&conn, &uid, "student");
            conn.execute(
                "INSERT INTO students(id, user_id, roll_number, name, year, semester, department_id, section)
                 VALUES(?, ?, ?, ?, 1, 1, 'd1', 'A')",
                (&sid, &uid, format!("R{:03}", i + 1), format!("Student {}", i + 1)),
            )
            .expect("student");
            students.push(resolve_caller(&conn, &uid).expect("student caller"));
        }

        let management = resolve_caller(&conn, "u-mgmt").expect("management caller");
        let teacher = resolve_caller(&conn, "u-t1").expect("teacher caller");
        let co_teacher = resolve_caller(&conn, "u-t2").expect("co-teacher caller");
        Fixture {
            conn,
            department_id: "d1".into(),
            subject_id: "sub1".into(),
            management,
            teacher,
            co_teacher,
            students,
        }
    }

    pub fn notification_count(conn: &Connection, user_id: &str, kind: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND notification_type = ?",
            (user_id, kind),
            |r| r.get(0),
        )
        .expect("count notifications")
    }
}
