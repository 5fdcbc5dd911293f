use super::notify::{self, Kind, Reference};
use super::{new_id, now_ts, require_row, roster, validate_section, validate_year, BatchEntry, Rejection};
use crate::auth::{Caller, Role};
use crate::calc;
use crate::error::{LedgerError, LedgerResult};
use crate::policy::Policy;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const EXAM_TYPES: &[&str] = &["assignment", "internal", "final"];

#[derive(Debug, Clone)]
pub struct NewExam {
    pub name: String,
    pub exam_type: String,
    pub subject_id: String,
    pub max_marks: f64,
    pub date: Option<NaiveDate>,
    pub year: i64,
    pub section: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub name: String,
    pub exam_type: String,
    pub subject_id: String,
    pub subject_name: String,
    pub max_marks: f64,
    pub date: Option<String>,
    pub year: i64,
    pub section: String,
    pub department_id: String,
    pub created_by: String,
    pub marks_entered: i64,
}

const EXAM_SELECT: &str = "SELECT e.id, e.name, e.exam_type, e.subject_id, sub.name, e.max_marks, e.date,
        e.year, e.section, e.department_id, e.created_by,
        (SELECT COUNT(*) FROM marks m WHERE m.exam_id = e.id)
     FROM exams e
     JOIN subjects sub ON sub.id = e.subject_id";

fn exam_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Exam> {
    Ok(Exam {
        id: r.get(0)?,
        name: r.get(1)?,
        exam_type: r.get(2)?,
        subject_id: r.get(3)?,
        subject_name: r.get(4)?,
        max_marks: r.get(5)?,
        date: r.get(6)?,
        year: r.get(7)?,
        section: r.get(8)?,
        department_id: r.get(9)?,
        created_by: r.get(10)?,
        marks_entered: r.get(11)?,
    })
}

pub fn load_exam(conn: &Connection, exam_id: &str) -> LedgerResult<Exam> {
    let sql = format!("{} WHERE e.id = ?", EXAM_SELECT);
    conn.query_row(&sql, [exam_id], exam_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "exam" })
}

pub fn create_exam(conn: &Connection, caller: &Caller, input: &NewExam) -> LedgerResult<Exam> {
    let staff_id = caller.staff_id()?.to_string();
    let department_id = caller
        .department_id
        .clone()
        .ok_or_else(|| LedgerError::forbidden("staff member has no department"))?;

    let name = input.name.trim();
    if name.is_empty() {
        return Err(LedgerError::bad_params("exam name must not be empty"));
    }
    if !EXAM_TYPES.contains(&input.exam_type.as_str()) {
        return Err(LedgerError::bad_params(format!(
            "examType must be one of {}",
            EXAM_TYPES.join(", ")
        )));
    }
    if !input.max_marks.is_finite() || input.max_marks <= 0.0 {
        return Err(LedgerError::bad_params("maxMarks must be a positive number"));
    }
    validate_year(input.year)?;
    let section = validate_section(&input.section)?;
    require_row(conn, "subjects", &input.subject_id, "subject")?;

    if caller.role != Role::Hod {
        let assigned: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM staff_assignments WHERE staff_id = ? AND subject_id = ? LIMIT 1",
                (&staff_id, &input.subject_id),
                |r| r.get(0),
            )
            .optional()?;
        if assigned.is_none() {
            return Err(LedgerError::forbidden("subject is not assigned to you"));
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO exams(id, name, exam_type, subject_id, max_marks, date, year, section, department_id, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            name,
            &input.exam_type,
            &input.subject_id,
            input.max_marks,
            input.date.map(|d| d.to_string()),
            input.year,
            &section,
            &department_id,
            &staff_id,
            now_ts(),
        ),
    )?;
    tracing::info!(exam_id = %id, subject_id = %input.subject_id, "exam created");
    load_exam(conn, &id)
}

/// Exams created by the calling staff member, newest first.
pub fn list_exams(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Exam>> {
    let staff_id = caller.staff_id()?;
    let sql = format!(
        "{} WHERE e.created_by = ? ORDER BY e.date DESC, e.created_at DESC",
        EXAM_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([staff_id], exam_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Removes the exam and every mark recorded against it.
pub fn delete_exam(conn: &Connection, caller: &Caller, exam_id: &str) -> LedgerResult<usize> {
    let exam = load_exam(conn, exam_id)?;
    caller.require_owner(&exam.created_by, "delete this exam")?;
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM marks WHERE exam_id = ?", [exam_id])?;
    tx.execute("DELETE FROM exams WHERE id = ?", [exam_id])?;
    tx.commit()?;
    tracing::info!(exam_id, marks_removed = removed, "exam deleted");
    Ok(removed)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnteredMark {
    pub student_id: String,
    pub marks_obtained: Option<f64>,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterReport {
    pub exam_id: String,
    pub entered: Vec<EnteredMark>,
    pub rejected: Vec<Rejection>,
    pub notifications_created: usize,
}

/// Upserts marks for students on the exam roster. `None` records the
/// student as absent. Entries that failed to parse, negative values, values
/// above the maximum and students off the roster are rejected individually.
pub fn enter_marks(
    conn: &Connection,
    policy: &Policy,
    caller: &Caller,
    exam_id: &str,
    marks: &HashMap<String, BatchEntry<Option<f64>>>,
) -> LedgerResult<EnterReport> {
    let exam = load_exam(conn, exam_id)?;
    caller.require_owner(&exam.created_by, "enter marks for this exam")?;
    let students = roster(conn, &exam.department_id, exam.year, &exam.section)?;
    let on_roster: HashSet<&str> = students.iter().map(|s| s.id.as_str()).collect();

    let mut report = EnterReport {
        exam_id: exam.id.clone(),
        entered: Vec::new(),
        rejected: Vec::new(),
        notifications_created: 0,
    };
    let mut foreign: Vec<&String> = marks
        .keys()
        .filter(|id| !on_roster.contains(id.as_str()))
        .collect();
    foreign.sort();
    for id in foreign {
        report
            .rejected
            .push(Rejection::new(id, "not_found", "student is not on this exam's roster"));
    }

    let tx = conn.unchecked_transaction()?;
    for student in &students {
        let value = match marks.get(&student.id) {
            None => continue,
            Some(Err(reason)) => {
                report
                    .rejected
                    .push(Rejection::new(&student.id, "bad_params", reason.clone()));
                continue;
            }
            Some(Ok(v)) => *v,
        };
        if let Some(m) = value {
            if !m.is_finite() || m < 0.0 {
                report.rejected.push(Rejection::new(
                    &student.id,
                    "bad_params",
                    "marks must be a non-negative number",
                ));
                continue;
            }
            if m > exam.max_marks {
                report.rejected.push(Rejection::new(
                    &student.id,
                    "bad_params",
                    format!("marks exceed the maximum of {}", exam.max_marks),
                ));
                continue;
            }
        }

        let grade = calc::grade_for(policy, value, exam.max_marks);
        tx.execute(
            "INSERT INTO marks(id, exam_id, student_id, marks_obtained, grade, entered_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id) DO UPDATE SET
               marks_obtained = excluded.marks_obtained,
               grade = excluded.grade,
               entered_at = excluded.entered_at",
            (new_id(), &exam.id, &student.id, value, &grade, now_ts()),
        )?;
        notify::notify(
            &tx,
            &student.user_id,
            Kind::ResultUploaded,
            "Result Uploaded",
            &format!(
                "Your result for {} in {} has been uploaded.",
                exam.name, exam.subject_name
            ),
            Some(Reference {
                kind: "marks",
                id: &exam.id,
            }),
        )?;
        report.notifications_created += 1;
        report.entered.push(EnteredMark {
            student_id: student.id.clone(),
            marks_obtained: value,
            grade,
        });
    }
    tx.commit()?;

    if !report.rejected.is_empty() {
        tracing::warn!(exam_id, rejected = report.rejected.len(), "mark entries skipped");
    }
    tracing::info!(exam_id, entered = report.entered.len(), "marks entered");
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSheetRow {
    pub student_id: String,
    pub roll_number: String,
    pub name: String,
    pub marks_obtained: Option<f64>,
    pub grade: Option<String>,
}

/// The exam roster with whatever marks have been entered so far.
pub fn mark_sheet(conn: &Connection, caller: &Caller, exam_id: &str) -> LedgerResult<(Exam, Vec<MarkSheetRow>)> {
    let exam = load_exam(conn, exam_id)?;
    caller.require_owner(&exam.created_by, "view marks for this exam")?;
    let students = roster(conn, &exam.department_id, exam.year, &exam.section)?;
    let mut stmt = conn.prepare("SELECT student_id, marks_obtained, grade FROM marks WHERE exam_id = ?")?;
    let mut existing: HashMap<String, (Option<f64>, String)> = stmt
        .query_map([exam_id], |r| Ok((r.get::<_, String>(0)?, (r.get(1)?, r.get(2)?))))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    let rows = students
        .into_iter()
        .map(|s| {
            let found = existing.remove(&s.id);
            MarkSheetRow {
                marks_obtained: found.as_ref().and_then(|f| f.0),
                grade: found.map(|f| f.1),
                student_id: s.id,
                roll_number: s.roll_number,
                name: s.name,
            }
        })
        .collect();
    Ok((exam, rows))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_type: String,
    pub max_marks: f64,
    pub marks_obtained: Option<f64>,
    pub percent: Option<f64>,
    pub grade: String,
    pub entered_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResults {
    pub subject_id: String,
    pub subject_name: String,
    pub results: Vec<ExamResult>,
}

/// The calling student's marks grouped by subject, newest entry first.
pub fn my_results(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<SubjectResults>> {
    let student_id = caller.student_id()?;
    let mut stmt = conn.prepare(
        "SELECT e.subject_id, sub.name, e.id, e.name, e.exam_type, e.max_marks, m.marks_obtained, m.grade, m.entered_at
         FROM marks m
         JOIN exams e ON e.id = m.exam_id
         JOIN subjects sub ON sub.id = e.subject_id
         WHERE m.student_id = ?
         ORDER BY m.entered_at DESC, m.rowid DESC",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            let max_marks: f64 = r.get(5)?;
            let marks_obtained: Option<f64> = r.get(6)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                ExamResult {
                    exam_id: r.get(2)?,
                    exam_name: r.get(3)?,
                    exam_type: r.get(4)?,
                    max_marks,
                    marks_obtained,
                    percent: calc::marks_percent(marks_obtained, max_marks),
                    grade: r.get(7)?,
                    entered_at: r.get(8)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<String, SubjectResults> = BTreeMap::new();
    for (subject_id, subject_name, result) in rows {
        grouped
            .entry(subject_name.clone())
            .or_insert_with(|| SubjectResults {
                subject_id,
                subject_name,
                results: Vec::new(),
            })
            .results
            .push(result);
    }
    Ok(grouped.into_values().collect())
}
