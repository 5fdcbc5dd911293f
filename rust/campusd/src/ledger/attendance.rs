use super::notify::{self, Kind, Reference};
use super::{
    new_id, now_ts, require_row, roster, validate_period, validate_section, validate_year,
    BatchEntry, Rejection, RosterStudent,
};
use crate::auth::{Caller, Role};
use crate::calc;
use crate::error::{LedgerError, LedgerResult};
use crate::policy::Policy;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct NewSession {
    pub subject_id: String,
    pub date: NaiveDate,
    pub period: i64,
    pub year: i64,
    pub section: String,
}

/// Creating a session for an occupied slot is not an error: the caller is
/// pointed at the session that already holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Created(String),
    Existing(String),
}

impl SessionOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub staff_id: String,
    pub date: String,
    pub period: i64,
    pub year: i64,
    pub section: String,
    pub department_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub student_id: String,
    pub subject_id: String,
    pub total_classes: i64,
    pub attended: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReport {
    pub session_id: String,
    pub marked: usize,
    pub present: usize,
    pub absent: usize,
    pub rejected: Vec<Rejection>,
    pub summaries: Vec<Summary>,
    pub low_attendance_students: Vec<String>,
    pub notifications_created: usize,
}

pub fn create_session(conn: &Connection, caller: &Caller, input: &NewSession) -> LedgerResult<SessionOutcome> {
    let staff_id = caller.staff_id()?.to_string();
    let department_id = caller
        .department_id
        .clone()
        .ok_or_else(|| LedgerError::forbidden("staff member has no department"))?;
    validate_period(input.period)?;
    validate_year(input.year)?;
    let section = validate_section(&input.section)?;
    require_row(conn, "subjects", &input.subject_id, "subject")?;

    let date = input.date.to_string();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_sessions
             WHERE subject_id = ? AND date = ? AND period = ? AND section = ? AND department_id = ?",
            (&input.subject_id, &date, input.period, &section, &department_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        tracing::warn!(session_id = %id, "attendance session already exists for this slot");
        return Ok(SessionOutcome::Existing(id));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO attendance_sessions(id, subject_id, staff_id, date, period, year, section, department_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &input.subject_id,
            &staff_id,
            &date,
            input.period,
            input.year,
            &section,
            &department_id,
            now_ts(),
        ),
    )?;
    tracing::info!(session_id = %id, subject_id = %input.subject_id, %date, period = input.period, "attendance session created");
    Ok(SessionOutcome::Created(id))
}

pub fn load_session(conn: &Connection, session_id: &str) -> LedgerResult<Session> {
    conn.query_row(
        "SELECT s.id, s.subject_id, sub.code, sub.name, s.staff_id, s.date, s.period, s.year, s.section, s.department_id
         FROM attendance_sessions s
         JOIN subjects sub ON sub.id = s.subject_id
         WHERE s.id = ?",
        [session_id],
        |r| {
            Ok(Session {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_code: r.get(2)?,
                subject_name: r.get(3)?,
                staff_id: r.get(4)?,
                date: r.get(5)?,
                period: r.get(6)?,
                year: r.get(7)?,
                section: r.get(8)?,
                department_id: r.get(9)?,
            })
        },
    )
    .optional()?
    .ok_or(LedgerError::NotFound { entity: "attendance session" })
}

/// Full recount of one (student, subject) pair over every session of that
/// subject, written back as the stored summary.
pub fn recompute_summary(conn: &Connection, student_id: &str, subject_id: &str) -> LedgerResult<Summary> {
    let (total_classes, attended): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(r.is_present), 0)
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         WHERE r.student_id = ? AND s.subject_id = ?",
        (student_id, subject_id),
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let percentage = calc::attendance_percentage(attended, total_classes);
    conn.execute(
        "INSERT INTO attendance_summary(student_id, subject_id, total_classes, attended, percentage, last_updated)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
           total_classes = excluded.total_classes,
           attended = excluded.attended,
           percentage = excluded.percentage,
           last_updated = excluded.last_updated",
        (student_id, subject_id, total_classes, attended, percentage, now_ts()),
    )?;
    tracing::debug!(student_id, subject_id, total_classes, attended, percentage, "attendance summary recomputed");
    Ok(Summary {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        total_classes,
        attended,
        percentage,
    })
}

/// Distinct user ids of every staff member assigned to the subject.
fn subject_teacher_users(conn: &Connection, subject_id: &str) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT st.user_id
         FROM staff_assignments a
         JOIN staff st ON st.id = a.staff_id
         WHERE a.subject_id = ?
         ORDER BY st.user_id",
    )?;
    let ids = stmt
        .query_map([subject_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn notify_low_attendance(
    conn: &Connection,
    policy: &Policy,
    student: &RosterStudent,
    session: &Session,
    percentage: f64,
) -> LedgerResult<usize> {
    let reference = Some(Reference {
        kind: "attendance",
        id: &session.subject_id,
    });
    notify::notify(
        conn,
        &student.user_id,
        Kind::LowAttendance,
        "Low Attendance Warning",
        &format!(
            "Your attendance in {} is {:.1}%, which is below the required {}%.",
            session.subject_name, percentage, policy.attendance_floor_percent
        ),
        reference,
    )?;
    let mut sent = 1;
    for user_id in subject_teacher_users(conn, &session.subject_id)? {
        notify::notify(
            conn,
            &user_id,
            Kind::LowAttendance,
            "Student Low Attendance Alert",
            &format!(
                "{} (Roll: {}) has {:.1}% attendance in {}.",
                student.name, student.roll_number, percentage, session.subject_name
            ),
            reference,
        )?;
        sent += 1;
    }
    Ok(sent)
}

/// Marks every student on the session roster. Students missing from
/// `presence` are recorded absent; unparseable entries are skipped and
/// reported, as are ids that are not on the roster.
pub fn mark_session(
    conn: &Connection,
    policy: &Policy,
    caller: &Caller,
    session_id: &str,
    presence: &HashMap<String, BatchEntry<bool>>,
) -> LedgerResult<MarkReport> {
    let session = load_session(conn, session_id)?;
    caller.require_owner(&session.staff_id, "mark this attendance session")?;
    let students = roster(conn, &session.department_id, session.year, &session.section)?;

    let on_roster: HashSet<&str> = students.iter().map(|s| s.id.as_str()).collect();
    let mut rejected: Vec<Rejection> = presence
        .keys()
        .filter(|id| !on_roster.contains(id.as_str()))
        .map(|id| Rejection::new(id, "not_found", "student is not on this session's roster"))
        .collect();
    rejected.sort_by(|a, b| a.student_id.cmp(&b.student_id));

    let mut report = MarkReport {
        session_id: session.id.clone(),
        marked: 0,
        present: 0,
        absent: 0,
        rejected,
        summaries: Vec::new(),
        low_attendance_students: Vec::new(),
        notifications_created: 0,
    };

    let tx = conn.unchecked_transaction()?;
    for student in &students {
        let is_present = match presence.get(&student.id) {
            None => false,
            Some(Ok(v)) => *v,
            Some(Err(reason)) => {
                report
                    .rejected
                    .push(Rejection::new(&student.id, "bad_params", reason.clone()));
                continue;
            }
        };
        tx.execute(
            "INSERT INTO attendance_records(id, session_id, student_id, is_present)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET
               is_present = excluded.is_present",
            (new_id(), &session.id, &student.id, is_present as i64),
        )?;
        report.marked += 1;
        if is_present {
            report.present += 1;
        } else {
            report.absent += 1;
        }

        let summary = recompute_summary(&tx, &student.id, &session.subject_id)?;
        if calc::is_low_attendance(policy, summary.total_classes, summary.percentage) {
            report.notifications_created +=
                notify_low_attendance(&tx, policy, student, &session, summary.percentage)?;
            report.low_attendance_students.push(student.id.clone());
        }
        report.summaries.push(summary);
    }
    tx.commit()?;

    if !report.rejected.is_empty() {
        tracing::warn!(session_id = %session.id, rejected = report.rejected.len(), "attendance entries skipped");
    }
    tracing::info!(
        session_id = %session.id,
        marked = report.marked,
        present = report.present,
        low_attendance = report.low_attendance_students.len(),
        "attendance marked"
    );
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    pub student: RosterStudent,
    pub is_present: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSheet {
    pub session: Session,
    pub rows: Vec<SheetRow>,
}

/// Roster of the session with any presence already recorded.
pub fn session_open(conn: &Connection, caller: &Caller, session_id: &str) -> LedgerResult<SessionSheet> {
    let session = load_session(conn, session_id)?;
    caller.require_owner(&session.staff_id, "open this attendance session")?;
    let students = roster(conn, &session.department_id, session.year, &session.section)?;

    let mut stmt = conn.prepare("SELECT student_id, is_present FROM attendance_records WHERE session_id = ?")?;
    let existing: HashMap<String, bool> = stmt
        .query_map([&session.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    let rows = students
        .into_iter()
        .map(|student| {
            let is_present = existing.get(&student.id).copied();
            SheetRow { student, is_present }
        })
        .collect();
    Ok(SessionSheet { session, rows })
}

pub fn list_sessions(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Session>> {
    let staff_id = caller.staff_id()?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.subject_id, sub.code, sub.name, s.staff_id, s.date, s.period, s.year, s.section, s.department_id
         FROM attendance_sessions s
         JOIN subjects sub ON sub.id = s.subject_id
         WHERE s.staff_id = ?
         ORDER BY s.date DESC, s.period DESC",
    )?;
    let rows = stmt
        .query_map([staff_id], |r| {
            Ok(Session {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_code: r.get(2)?,
                subject_name: r.get(3)?,
                staff_id: r.get(4)?,
                date: r.get(5)?,
                period: r.get(6)?,
                year: r.get(7)?,
                section: r.get(8)?,
                department_id: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRecord {
    pub session_id: String,
    pub date: String,
    pub period: i64,
    pub is_present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendance {
    pub subject_code: String,
    pub subject_name: String,
    pub summary: Summary,
    pub last_updated: String,
    pub recent: Vec<RecentRecord>,
}

const RECENT_RECORDS: i64 = 10;

/// The calling student's stored summaries, each with its latest records.
pub fn my_summary(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<SubjectAttendance>> {
    let student_id = caller.student_id()?;
    let mut stmt = conn.prepare(
        "SELECT a.subject_id, sub.code, sub.name, a.total_classes, a.attended, a.percentage, a.last_updated
         FROM attendance_summary a
         JOIN subjects sub ON sub.id = a.subject_id
         WHERE a.student_id = ?
         ORDER BY sub.code",
    )?;
    let summaries = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                Summary {
                    student_id: student_id.to_string(),
                    subject_id: r.get(0)?,
                    total_classes: r.get(3)?,
                    attended: r.get(4)?,
                    percentage: r.get(5)?,
                },
                r.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut recent_stmt = conn.prepare(
        "SELECT s.id, s.date, s.period, r.is_present
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         WHERE r.student_id = ? AND s.subject_id = ?
         ORDER BY s.date DESC, s.period DESC
         LIMIT ?",
    )?;
    let mut out = Vec::with_capacity(summaries.len());
    for (subject_code, subject_name, summary, last_updated) in summaries {
        let recent = recent_stmt
            .query_map((student_id, &summary.subject_id, RECENT_RECORDS), |r| {
                Ok(RecentRecord {
                    session_id: r.get(0)?,
                    date: r.get(1)?,
                    period: r.get(2)?,
                    is_present: r.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(SubjectAttendance {
            subject_code,
            subject_name,
            summary,
            last_updated,
            recent,
        });
    }
    Ok(out)
}

/// Stored summary for any student, for teaching staff and management. A pair
/// that has never been marked reads as zero classes.
pub fn summary_for(conn: &Connection, caller: &Caller, student_id: &str, subject_id: &str) -> LedgerResult<Summary> {
    caller.require_any(&[Role::Staff, Role::Hod, Role::Management], "view attendance summaries")?;
    require_row(conn, "students", student_id, "student")?;
    require_row(conn, "subjects", subject_id, "subject")?;
    let stored = conn
        .query_row(
            "SELECT total_classes, attended, percentage FROM attendance_summary
             WHERE student_id = ? AND subject_id = ?",
            (student_id, subject_id),
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, f64>(2)?)),
        )
        .optional()?;
    let (total_classes, attended, percentage) = stored.unwrap_or((0, 0, 0.0));
    Ok(Summary {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        total_classes,
        attended,
        percentage,
    })
}
