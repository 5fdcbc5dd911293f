use super::{new_id, require_row, validate_period, validate_section, validate_year};
use crate::auth::{Caller, Role};
use crate::error::{LedgerError, LedgerResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub department_id: String,
    pub year: i64,
    pub section: String,
    pub day_of_week: i64,
    pub period: i64,
    pub subject_id: String,
    pub staff_id: String,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub department_id: String,
    pub year: i64,
    pub section: String,
    pub day_of_week: i64,
    pub day_name: &'static str,
    pub period: i64,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub staff_id: String,
    pub staff_name: String,
    pub room: Option<String>,
}

const ENTRY_SELECT: &str = "SELECT t.id, t.department_id, t.year, t.section, t.day_of_week, t.period,
        t.subject_id, sub.code, sub.name, t.staff_id, sf.name, t.room
     FROM timetable t
     JOIN subjects sub ON sub.id = t.subject_id
     JOIN staff sf ON sf.id = t.staff_id";

fn entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let day: i64 = r.get(4)?;
    Ok(Entry {
        id: r.get(0)?,
        department_id: r.get(1)?,
        year: r.get(2)?,
        section: r.get(3)?,
        day_of_week: day,
        day_name: usize::try_from(day)
            .ok()
            .and_then(|d| DAY_NAMES.get(d).copied())
            .unwrap_or(""),
        period: r.get(5)?,
        subject_id: r.get(6)?,
        subject_code: r.get(7)?,
        subject_name: r.get(8)?,
        staff_id: r.get(9)?,
        staff_name: r.get(10)?,
        room: r.get(11)?,
    })
}

fn query(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> LedgerResult<Vec<Entry>> {
    let sql = format!(
        "{} WHERE t.is_active = 1 AND {} ORDER BY t.day_of_week, t.period",
        ENTRY_SELECT, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One active entry per (department, year, section, day, period); a second
/// one is a conflict naming the entry that holds the slot.
pub fn create_entry(conn: &Connection, caller: &Caller, input: &NewEntry) -> LedgerResult<Entry> {
    caller.require_any(&[Role::Staff, Role::Hod], "edit the timetable")?;
    validate_year(input.year)?;
    validate_period(input.period)?;
    if !(0..=6).contains(&input.day_of_week) {
        return Err(LedgerError::bad_params("dayOfWeek must be in 0..=6"));
    }
    let section = validate_section(&input.section)?;
    require_row(conn, "departments", &input.department_id, "department")?;
    require_row(conn, "subjects", &input.subject_id, "subject")?;
    require_row(conn, "staff", &input.staff_id, "staff member")?;

    let occupied: Option<String> = conn
        .query_row(
            "SELECT id FROM timetable
             WHERE department_id = ? AND year = ? AND section = ? AND day_of_week = ? AND period = ? AND is_active = 1",
            (&input.department_id, input.year, &section, input.day_of_week, input.period),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = occupied {
        tracing::warn!(entry_id = %existing, "timetable slot already taken");
        return Err(LedgerError::conflict_with("this slot already has an entry", existing));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO timetable(id, department_id, year, section, day_of_week, period, subject_id, staff_id, room, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &id,
            &input.department_id,
            input.year,
            &section,
            input.day_of_week,
            input.period,
            &input.subject_id,
            &input.staff_id,
            &input.room,
        ),
    )?;
    tracing::info!(entry_id = %id, day = input.day_of_week, period = input.period, "timetable entry added");
    let mut rows = query(conn, "t.id = ?", [&id])?;
    rows.pop().ok_or(LedgerError::NotFound { entity: "timetable entry" })
}

/// Deactivates the entry; the row stays for history and frees the slot.
pub fn remove_entry(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    caller.require_any(&[Role::Staff, Role::Hod], "edit the timetable")?;
    let n = conn.execute(
        "UPDATE timetable SET is_active = 0 WHERE id = ? AND is_active = 1",
        [id],
    )?;
    if n == 0 {
        return Err(LedgerError::NotFound { entity: "timetable entry" });
    }
    tracing::info!(entry_id = id, "timetable entry removed");
    Ok(())
}

pub fn my_timetable(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Entry>> {
    let student_id = caller.student_id()?;
    query(
        conn,
        "EXISTS (SELECT 1 FROM students s WHERE s.id = ? AND s.department_id = t.department_id
                 AND s.year = t.year AND s.section = t.section)",
        [student_id],
    )
}

pub fn staff_schedule(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Entry>> {
    let staff_id = caller.staff_id()?;
    query(conn, "t.staff_id = ?", [staff_id])
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub department_id: Option<String>,
    pub year: Option<i64>,
    pub section: Option<String>,
}

pub fn manage(conn: &Connection, caller: &Caller, filter: &EntryFilter) -> LedgerResult<Vec<Entry>> {
    caller.require_any(&[Role::Staff, Role::Hod, Role::Management], "view the timetable")?;
    let section = filter.section.as_deref().map(validate_section).transpose()?;
    query(
        conn,
        "(?1 IS NULL OR t.department_id = ?1) AND (?2 IS NULL OR t.year = ?2) AND (?3 IS NULL OR t.section = ?3)",
        (&filter.department_id, filter.year, section),
    )
}
