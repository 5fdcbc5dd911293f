//! Landing summaries, one shape per role. Nothing here writes; every figure
//! is read from rows the other ledgers own.

use super::complaints::{self, Complaint};
use super::feedback::{self, Feedback};
use super::library;
use super::notices::{self, Notice};
use super::notify;
use super::timetable::{self, Entry};
use crate::auth::{Caller, Role};
use crate::error::LedgerResult;
use crate::policy::Policy;
use chrono::{DateTime, Datelike, Utc};
use rusqlite::Connection;
use serde::Serialize;

const RECENT: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPanel {
    /// Mean of the per-subject percentages, one decimal.
    pub average_attendance: f64,
    pub pending_fees: i64,
    pub pending_fee_balance: f64,
    pub borrowed_books: usize,
    pub overdue_books: usize,
    pub open_complaints: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffPanel {
    pub today_classes: Vec<Entry>,
    pub open_assigned_complaints: i64,
    pub department_students: i64,
    pub recent_feedback: Vec<Feedback>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPanel {
    pub total_students: i64,
    pub total_staff: i64,
    pub open_complaints: i64,
    pub pending_fees_total: f64,
    pub recent_complaints: Vec<Complaint>,
    pub recent_feedback: Vec<Feedback>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub role: &'static str,
    pub unread_notifications: i64,
    pub recent_notices: Vec<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentPanel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff: Option<StaffPanel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management: Option<ManagementPanel>,
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> LedgerResult<i64> {
    Ok(conn.query_row(sql, params, |r| r.get(0))?)
}

fn student_panel(conn: &Connection, policy: &Policy, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<StudentPanel> {
    let student_id = caller.student_id()?;
    let average: Option<f64> = conn.query_row(
        "SELECT AVG(percentage) FROM attendance_summary WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    let (pending_fees, pending_fee_balance): (i64, f64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(amount_due - amount_paid), 0)
         FROM student_fees
         WHERE student_id = ? AND payment_status != 'paid'",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let open_loans: Vec<_> = library::my_books(conn, policy, caller, now)?
        .into_iter()
        .filter(|l| l.return_date.is_none())
        .collect();
    Ok(StudentPanel {
        average_attendance: average.map_or(0.0, |a| (a * 10.0).round() / 10.0),
        pending_fees,
        pending_fee_balance,
        borrowed_books: open_loans.len(),
        overdue_books: open_loans.iter().filter(|l| l.state.overdue).count(),
        open_complaints: count(
            conn,
            "SELECT COUNT(*) FROM complaints WHERE submitted_by = ? AND status IN ('pending', 'in_progress')",
            [student_id],
        )?,
    })
}

fn staff_panel(conn: &Connection, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<StaffPanel> {
    let staff_id = caller.staff_id()?;
    let today = i64::from(now.weekday().num_days_from_monday());
    let today_classes = timetable::staff_schedule(conn, caller)?
        .into_iter()
        .filter(|e| e.day_of_week == today)
        .collect();
    let mut recent_feedback = feedback::received(conn, caller)?.feedback;
    recent_feedback.truncate(RECENT);
    Ok(StaffPanel {
        today_classes,
        open_assigned_complaints: count(
            conn,
            "SELECT COUNT(*) FROM complaints WHERE assigned_to = ? AND status IN ('pending', 'in_progress')",
            [staff_id],
        )?,
        department_students: count(
            conn,
            "SELECT COUNT(*) FROM students WHERE department_id = ?",
            [&caller.department_id],
        )?,
        recent_feedback,
    })
}

fn management_panel(conn: &Connection, caller: &Caller) -> LedgerResult<ManagementPanel> {
    let mut recent_complaints = complaints::all(conn, caller, None, None)?;
    recent_complaints.truncate(RECENT);
    let mut recent_feedback = feedback::all(conn, caller, None)?;
    recent_feedback.truncate(RECENT);
    let pending_fees_total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_due - amount_paid), 0) FROM student_fees WHERE payment_status != 'paid'",
        [],
        |r| r.get(0),
    )?;
    Ok(ManagementPanel {
        total_students: count(conn, "SELECT COUNT(*) FROM students", [])?,
        total_staff: count(conn, "SELECT COUNT(*) FROM staff", [])?,
        open_complaints: count(
            conn,
            "SELECT COUNT(*) FROM complaints WHERE status IN ('pending', 'in_progress')",
            [],
        )?,
        pending_fees_total,
        recent_complaints,
        recent_feedback,
    })
}

/// The caller's landing view as of `now`: unread count, the newest live
/// notices, and the panel for its role. HODs get the staff panel.
pub fn summary(conn: &Connection, policy: &Policy, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<Dashboard> {
    let mut recent_notices = notices::list(conn, None, now)?;
    recent_notices.truncate(RECENT);
    let mut dashboard = Dashboard {
        role: caller.role.as_str(),
        unread_notifications: notify::unread_count(conn, caller)?,
        recent_notices,
        student: None,
        staff: None,
        management: None,
    };
    match caller.role {
        Role::Student => dashboard.student = Some(student_panel(conn, policy, caller, now)?),
        Role::Staff | Role::Hod => dashboard.staff = Some(staff_panel(conn, caller, now)?),
        Role::Management => dashboard.management = Some(management_panel(conn, caller)?),
    }
    tracing::debug!(role = dashboard.role, "dashboard assembled");
    Ok(dashboard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::fixture;
    use chrono::TimeZone;

    // A Wednesday.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("ts")
    }

    #[test]
    fn student_panel_aggregates_own_rows() {
        let f = fixture(2);
        let c = &f.conn;
        c.execute_batch(
            "INSERT INTO attendance_summary(student_id, subject_id, total_classes, attended, percentage, last_updated)
                VALUES('s1', 'sub1', 4, 3, 75.0, '2024-05-01T00:00:00Z');
             INSERT INTO subjects(id, code, name, department_id, year, semester, credits, is_lab)
                VALUES('sub2', 'CS102', 'Maths', 'd1', 1, 1, 3, 0);
             INSERT INTO attendance_summary(student_id, subject_id, total_classes, attended, percentage, last_updated)
                VALUES('s1', 'sub2', 3, 2, 66.66, '2024-05-01T00:00:00Z');
             INSERT INTO fee_structures(id, academic_year, year, amount, due_date, created_at)
                VALUES('fs1', '2024-25', 1, 1000, '2024-06-01', '2024-05-01T00:00:00Z');
             INSERT INTO fee_structures(id, academic_year, year, amount, due_date, created_at)
                VALUES('fs2', '2024-25', 1, 500, '2024-06-01', '2024-05-01T00:00:00Z');
             INSERT INTO student_fees(id, student_id, fee_structure_id, amount_due, amount_paid, payment_status, created_at, updated_at)
                VALUES('f1', 's1', 'fs1', 1000, 400, 'partial', 'x', 'x');
             INSERT INTO student_fees(id, student_id, fee_structure_id, amount_due, amount_paid, payment_status, created_at, updated_at)
                VALUES('f2', 's1', 'fs2', 500, 500, 'paid', 'x', 'x');
             INSERT INTO books(id, isbn, title, author, total_copies, available_copies, added_at)
                VALUES('b1', '978-0', 'SICP', 'Abelson', 2, 0, 'x');
             INSERT INTO book_issues(id, book_id, student_id, issue_date, due_date, status)
                VALUES('i1', 'b1', 's1', '2024-04-01T09:00:00Z', '2024-04-15T09:00:00Z', 'issued');
             INSERT INTO book_issues(id, book_id, student_id, issue_date, due_date, status)
                VALUES('i2', 'b1', 's1', '2024-04-25T09:00:00Z', '2024-05-09T09:00:00Z', 'issued');
             INSERT INTO complaints(id, complaint_type, subject, description, status, submitted_by, created_at, updated_at)
                VALUES('c1', 'utility', 'Fan', 'Broken', 'in_progress', 's1', 'x', 'x');
             INSERT INTO complaints(id, complaint_type, subject, description, status, submitted_by, created_at, updated_at)
                VALUES('c2', 'utility', 'Tap', 'Leaks', 'resolved', 's1', 'x', 'x');",
        )
        .expect("seed");

        let d = summary(c, &Policy::default(), &f.students[0], now()).expect("dashboard");
        assert_eq!(d.role, "student");
        let p = d.student.expect("student panel");
        assert_eq!(p.average_attendance, 70.8);
        assert_eq!(p.pending_fees, 1);
        assert_eq!(p.pending_fee_balance, 600.0);
        assert_eq!(p.borrowed_books, 2);
        assert_eq!(p.overdue_books, 1);
        assert_eq!(p.open_complaints, 1);
        assert!(d.staff.is_none() && d.management.is_none());

        let other = summary(c, &Policy::default(), &f.students[1], now()).expect("other");
        let p = other.student.expect("panel");
        assert_eq!(p.average_attendance, 0.0);
        assert_eq!(p.borrowed_books, 0);
    }

    #[test]
    fn staff_panel_shows_todays_classes_only() {
        let f = fixture(3);
        f.conn
            .execute_batch(
                "INSERT INTO timetable(id, department_id, year, section, day_of_week, period, subject_id, staff_id, is_active)
                    VALUES('tt1', 'd1', 1, 'A', 2, 3, 'sub1', 't1', 1);
                 INSERT INTO timetable(id, department_id, year, section, day_of_week, period, subject_id, staff_id, is_active)
                    VALUES('tt2', 'd1', 1, 'A', 3, 1, 'sub1', 't1', 1);
                 INSERT INTO complaints(id, complaint_type, subject, description, status, submitted_by, assigned_to, created_at, updated_at)
                    VALUES('c1', 'academic', 'Syllabus', 'Too fast', 'pending', 's1', 't1', 'x', 'x');",
            )
            .expect("seed");
        let d = summary(&f.conn, &Policy::default(), &f.teacher, now()).expect("dashboard");
        let p = d.staff.expect("staff panel");
        assert_eq!(p.today_classes.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["tt1"]);
        assert_eq!(p.open_assigned_complaints, 1);
        assert_eq!(p.department_students, 3);
        assert!(p.recent_feedback.is_empty());
    }

    #[test]
    fn management_panel_counts_campus_wide() {
        let f = fixture(2);
        f.conn
            .execute_batch(
                "INSERT INTO fee_structures(id, academic_year, year, amount, due_date, created_at)
                    VALUES('fs1', '2024-25', 1, 1000, '2024-06-01', 'x');
                 INSERT INTO student_fees(id, student_id, fee_structure_id, amount_due, amount_paid, payment_status, created_at, updated_at)
                    VALUES('f1', 's1', 'fs1', 1000, 0, 'pending', 'x', 'x');
                 INSERT INTO student_fees(id, student_id, fee_structure_id, amount_due, amount_paid, payment_status, created_at, updated_at)
                    VALUES('f2', 's2', 'fs1', 1000, 250, 'partial', 'x', 'x');",
            )
            .expect("seed");
        let d = summary(&f.conn, &Policy::default(), &f.management, now()).expect("dashboard");
        let p = d.management.expect("management panel");
        assert_eq!(p.total_students, 2);
        assert_eq!(p.total_staff, 2);
        assert_eq!(p.open_complaints, 0);
        assert_eq!(p.pending_fees_total, 1750.0);
    }
}
