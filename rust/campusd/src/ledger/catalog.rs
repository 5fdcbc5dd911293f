//! Users and their profiles, departments, subjects and the staff-subject
//! assignments that decide who teaches what.

use super::{new_id, now_ts, require_row, validate_section, validate_year};
use crate::auth::{Caller, Role};
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    pub name: String,
    pub department_id: Option<String>,
    pub roll_number: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub section: Option<String>,
    pub phone: Option<String>,
    pub employee_id: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub profile_id: Option<String>,
    pub name: Option<String>,
    pub department_id: Option<String>,
}

const USER_SELECT: &str = "SELECT u.id, u.username, u.email, u.role, u.is_active,
        COALESCE(st.id, sf.id, m.id),
        COALESCE(st.name, sf.name, m.name),
        COALESCE(st.department_id, sf.department_id)
     FROM users u
     LEFT JOIN students st ON st.user_id = u.id
     LEFT JOIN staff sf ON sf.user_id = u.id
     LEFT JOIN management m ON m.user_id = u.id";

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: r.get(0)?,
        username: r.get(1)?,
        email: r.get(2)?,
        role: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
        profile_id: r.get(5)?,
        name: r.get(6)?,
        department_id: r.get(7)?,
    })
}

fn load_user(conn: &Connection, id: &str) -> LedgerResult<UserSummary> {
    let sql = format!("{} WHERE u.id = ?", USER_SELECT);
    conn.query_row(&sql, [id], user_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "user" })
}

fn management_exists(conn: &Connection) -> LedgerResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'management'",
        [],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn required<'a>(value: &'a Option<String>, field: &str) -> LedgerResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::bad_params(format!("missing {}", field)))
}

/// `None` when the field was not sent; an empty value is never valid.
fn trimmed<'a>(value: &'a Option<String>, field: &str) -> LedgerResult<Option<&'a str>> {
    match value.as_deref().map(str::trim) {
        Some("") => Err(LedgerError::bad_params(format!("{} must not be empty", field))),
        other => Ok(other),
    }
}

/// Uniqueness check for edits: `sql` binds the new value as ?1 and the
/// edited row's id as ?2 so the row never collides with itself.
fn taken_by_other(conn: &Connection, sql: &str, value: &str, own_id: &str, what: &str) -> LedgerResult<()> {
    let found: Option<String> = conn.query_row(sql, (value, own_id), |r| r.get(0)).optional()?;
    match found {
        Some(id) => Err(LedgerError::conflict_with(format!("{} already exists", what), id)),
        None => Ok(()),
    }
}

fn taken(conn: &Connection, sql: &str, value: &str, what: &str) -> LedgerResult<()> {
    let found: Option<String> = conn.query_row(sql, [value], |r| r.get(0)).optional()?;
    match found {
        Some(id) => Err(LedgerError::conflict_with(format!("{} already exists", what), id)),
        None => Ok(()),
    }
}

/// Who may create whom. Before any management account exists the first one
/// can be created without an actor; after that management creates anyone, a
/// HOD creates staff and students in its department, and staff register
/// students in theirs.
fn check_creator(conn: &Connection, caller: Option<&Caller>, role: Role, department_id: Option<&str>) -> LedgerResult<()> {
    if !management_exists(conn)? {
        if role == Role::Management {
            return Ok(());
        }
        return Err(LedgerError::forbidden("the first account must be a management user"));
    }
    let caller = caller.ok_or_else(|| LedgerError::forbidden("an actor is required to create users"))?;
    let own_department = department_id.is_some() && caller.department_id.as_deref() == department_id;
    match (caller.role, role) {
        (Role::Management, _) => Ok(()),
        (Role::Hod, Role::Staff | Role::Student) if own_department => Ok(()),
        (Role::Staff, Role::Student) if own_department => Ok(()),
        (Role::Hod | Role::Staff, Role::Staff | Role::Student) => Err(LedgerError::forbidden(
            "users can only be created in your own department",
        )),
        _ => Err(LedgerError::forbidden(format!(
            "{} may not create {} accounts",
            caller.role.as_str(),
            role.as_str()
        ))),
    }
}

pub fn create_user(conn: &Connection, caller: Option<&Caller>, input: &NewUser) -> LedgerResult<UserSummary> {
    let role = input
        .role
        .ok_or_else(|| LedgerError::bad_params("role must be student, staff, hod or management"))?;
    let username = input.username.trim();
    let email = input.email.trim();
    let name = input.name.trim();
    if username.is_empty() || email.is_empty() || name.is_empty() {
        return Err(LedgerError::bad_params("username, email and name are required"));
    }

    // Staff and HODs default to creating inside their own department.
    let department_id = match (&input.department_id, caller) {
        (Some(d), _) => Some(d.clone()),
        (None, Some(c)) if role != Role::Management => c.department_id.clone(),
        _ => None,
    };
    check_creator(conn, caller, role, department_id.as_deref())?;

    taken(conn, "SELECT id FROM users WHERE username = ?", username, "username")?;
    taken(conn, "SELECT id FROM users WHERE email = ?", email, "email")?;

    let user_id = new_id();
    let profile_id = new_id();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(id, username, email, role, is_active, created_at) VALUES(?, ?, ?, ?, 1, ?)",
        (&user_id, username, email, role.as_str(), now_ts()),
    )?;
    match role {
        Role::Student => {
            let department_id = department_id
                .as_deref()
                .ok_or_else(|| LedgerError::bad_params("missing departmentId"))?;
            require_row(&tx, "departments", department_id, "department")?;
            let roll = required(&input.roll_number, "rollNumber")?;
            taken(&tx, "SELECT id FROM students WHERE roll_number = ?", roll, "roll number")?;
            let year = input.year.ok_or_else(|| LedgerError::bad_params("missing year"))?;
            validate_year(year)?;
            let semester = input.semester.unwrap_or(year * 2 - 1);
            if !(1..=8).contains(&semester) {
                return Err(LedgerError::bad_params("semester must be in 1..=8"));
            }
            let section = validate_section(required(&input.section, "section")?)?;
            tx.execute(
                "INSERT INTO students(id, user_id, roll_number, name, year, semester, department_id, section, phone, admission_date)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, date('now'))",
                (&profile_id, &user_id, roll, name, year, semester, department_id, &section, &input.phone),
            )?;
        }
        Role::Staff | Role::Hod => {
            let department_id = department_id
                .as_deref()
                .ok_or_else(|| LedgerError::bad_params("missing departmentId"))?;
            require_row(&tx, "departments", department_id, "department")?;
            let employee_id = required(&input.employee_id, "employeeId")?;
            taken(&tx, "SELECT id FROM staff WHERE employee_id = ?", employee_id, "employee id")?;
            let designation = input
                .designation
                .as_deref()
                .unwrap_or(if role == Role::Hod { "Head of Department" } else { "Lecturer" });
            tx.execute(
                "INSERT INTO staff(id, user_id, employee_id, name, department_id, designation)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&profile_id, &user_id, employee_id, name, department_id, designation),
            )?;
            if role == Role::Hod {
                tx.execute(
                    "UPDATE departments SET hod_id = ? WHERE id = ?",
                    (&profile_id, department_id),
                )?;
            }
        }
        Role::Management => {
            let employee_id = required(&input.employee_id, "employeeId")?;
            taken(&tx, "SELECT id FROM management WHERE employee_id = ?", employee_id, "employee id")?;
            tx.execute(
                "INSERT INTO management(id, user_id, employee_id, name, designation) VALUES(?, ?, ?, ?, ?)",
                (
                    &profile_id,
                    &user_id,
                    employee_id,
                    name,
                    input.designation.as_deref().unwrap_or("Administrator"),
                ),
            )?;
        }
    }
    tx.commit()?;
    tracing::info!(user_id = %user_id, role = role.as_str(), username, "user created");
    load_user(conn, &user_id)
}

/// Management sees every account; a HOD sees the accounts of its department.
pub fn list_users(conn: &Connection, caller: &Caller, role: Option<Role>) -> LedgerResult<Vec<UserSummary>> {
    caller.require_any(&[Role::Management, Role::Hod], "list users")?;
    let department = match caller.role {
        Role::Hod => caller.department_id.clone(),
        _ => None,
    };
    let sql = format!(
        "{} WHERE (?1 IS NULL OR u.role = ?1)
           AND (?2 IS NULL OR COALESCE(st.department_id, sf.department_id) = ?2)
         ORDER BY u.role, u.username",
        USER_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((role.map(Role::as_str), department), user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_active(conn: &Connection, caller: &Caller, user_id: &str, active: bool) -> LedgerResult<UserSummary> {
    caller.require_management("activate or deactivate users")?;
    if user_id == caller.user_id && !active {
        return Err(LedgerError::bad_params("you cannot deactivate your own account"));
    }
    let n = conn.execute(
        "UPDATE users SET is_active = ? WHERE id = ?",
        (active as i64, user_id),
    )?;
    if n == 0 {
        return Err(LedgerError::NotFound { entity: "user" });
    }
    tracing::info!(user_id, active, "user activation changed");
    load_user(conn, user_id)
}

/// Fields left `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub department_id: Option<String>,
    pub roll_number: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub section: Option<String>,
    pub phone: Option<String>,
    pub employee_id: Option<String>,
    pub designation: Option<String>,
}

/// Edits reach as far as account creation does: management edits anyone,
/// a HOD edits staff and students of its department, staff edit students
/// of theirs.
fn check_editor(caller: &Caller, target: &UserSummary, role: Role) -> LedgerResult<()> {
    let own_department = target.department_id.is_some() && caller.department_id == target.department_id;
    match (caller.role, role) {
        (Role::Management, _) => Ok(()),
        (Role::Hod, Role::Staff | Role::Student) if own_department => Ok(()),
        (Role::Staff, Role::Student) if own_department => Ok(()),
        _ => Err(LedgerError::forbidden(format!(
            "{} may not edit this {} account",
            caller.role.as_str(),
            role.as_str()
        ))),
    }
}

fn reject_fields(fields: &[(bool, &str)], role: Role) -> LedgerResult<()> {
    match fields.iter().find(|(set, _)| *set) {
        Some((_, field)) => Err(LedgerError::bad_params(format!(
            "{} does not apply to {} accounts",
            field,
            role.as_str()
        ))),
        None => Ok(()),
    }
}

pub fn update_user(conn: &Connection, caller: &Caller, user_id: &str, patch: &UserPatch) -> LedgerResult<UserSummary> {
    let target = load_user(conn, user_id)?;
    let role = Role::parse(&target.role)
        .ok_or_else(|| LedgerError::Corrupt(format!("user {} has unknown role {}", user_id, target.role)))?;
    check_editor(caller, &target, role)?;
    let profile_id = target
        .profile_id
        .clone()
        .ok_or_else(|| LedgerError::Corrupt(format!("user {} has no profile", user_id)))?;

    let username = trimmed(&patch.username, "username")?;
    let email = trimmed(&patch.email, "email")?;
    let name = trimmed(&patch.name, "name")?;
    let department_id = trimmed(&patch.department_id, "departmentId")?;
    let roll_number = trimmed(&patch.roll_number, "rollNumber")?;
    let employee_id = trimmed(&patch.employee_id, "employeeId")?;
    let designation = trimmed(&patch.designation, "designation")?;
    let section = patch.section.as_deref().map(validate_section).transpose()?;
    if let Some(year) = patch.year {
        validate_year(year)?;
    }
    if patch.semester.is_some_and(|s| !(1..=8).contains(&s)) {
        return Err(LedgerError::bad_params("semester must be in 1..=8"));
    }

    match role {
        Role::Student => reject_fields(
            &[(employee_id.is_some(), "employeeId"), (designation.is_some(), "designation")],
            role,
        )?,
        _ => reject_fields(
            &[
                (roll_number.is_some(), "rollNumber"),
                (patch.year.is_some(), "year"),
                (patch.semester.is_some(), "semester"),
                (section.is_some(), "section"),
                (patch.phone.is_some(), "phone"),
                (role == Role::Management && department_id.is_some(), "departmentId"),
            ],
            role,
        )?,
    }

    let moving = department_id.filter(|d| target.department_id.as_deref() != Some(*d));
    if let Some(d) = moving {
        caller.require_management("move accounts between departments")?;
        require_row(conn, "departments", d, "department")?;
        if role.is_teaching() {
            let held: i64 = conn.query_row(
                "SELECT COUNT(*) FROM staff_assignments WHERE staff_id = ?",
                [&profile_id],
                |r| r.get(0),
            )?;
            if held > 0 {
                return Err(LedgerError::Integrity {
                    message: format!("cannot move staff member: it holds {} subject assignments", held),
                    dependents: held,
                });
            }
        }
    }

    if let Some(u) = username {
        taken_by_other(conn, "SELECT id FROM users WHERE username = ?1 AND id != ?2", u, user_id, "username")?;
    }
    if let Some(e) = email {
        taken_by_other(conn, "SELECT id FROM users WHERE email = ?1 AND id != ?2", e, user_id, "email")?;
    }
    if let Some(r) = roll_number {
        taken_by_other(
            conn,
            "SELECT id FROM students WHERE roll_number = ?1 AND id != ?2",
            r,
            &profile_id,
            "roll number",
        )?;
    }
    if let Some(e) = employee_id {
        let sql = match role {
            Role::Management => "SELECT id FROM management WHERE employee_id = ?1 AND id != ?2",
            _ => "SELECT id FROM staff WHERE employee_id = ?1 AND id != ?2",
        };
        taken_by_other(conn, sql, e, &profile_id, "employee id")?;
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE users SET username = COALESCE(?1, username), email = COALESCE(?2, email) WHERE id = ?3",
        (username, email, user_id),
    )?;
    match role {
        Role::Student => {
            tx.execute(
                "UPDATE students SET name = COALESCE(?1, name), roll_number = COALESCE(?2, roll_number),
                    year = COALESCE(?3, year), semester = COALESCE(?4, semester),
                    section = COALESCE(?5, section), phone = COALESCE(?6, phone),
                    department_id = COALESCE(?7, department_id)
                 WHERE id = ?8",
                (
                    name,
                    roll_number,
                    patch.year,
                    patch.semester,
                    &section,
                    &patch.phone,
                    department_id,
                    &profile_id,
                ),
            )?;
        }
        Role::Staff | Role::Hod => {
            tx.execute(
                "UPDATE staff SET name = COALESCE(?1, name), employee_id = COALESCE(?2, employee_id),
                    designation = COALESCE(?3, designation), department_id = COALESCE(?4, department_id)
                 WHERE id = ?5",
                (name, employee_id, designation, department_id, &profile_id),
            )?;
        }
        Role::Management => {
            tx.execute(
                "UPDATE management SET name = COALESCE(?1, name), employee_id = COALESCE(?2, employee_id),
                    designation = COALESCE(?3, designation)
                 WHERE id = ?4",
                (name, employee_id, designation, &profile_id),
            )?;
        }
    }
    // A HOD heads the department it belongs to.
    if let (Role::Hod, Some(d)) = (role, moving) {
        tx.execute("UPDATE departments SET hod_id = NULL WHERE hod_id = ?", [&profile_id])?;
        tx.execute("UPDATE departments SET hod_id = ? WHERE id = ?", (&profile_id, d))?;
    }
    tx.commit()?;
    tracing::info!(user_id, role = role.as_str(), "user updated");
    load_user(conn, user_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub code: String,
    pub name: String,
    pub hod_id: Option<String>,
    pub student_count: i64,
    pub staff_count: i64,
}

fn department_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        hod_id: r.get(3)?,
        student_count: r.get(4)?,
        staff_count: r.get(5)?,
    })
}

const DEPARTMENT_SELECT: &str = "SELECT d.id, d.code, d.name, d.hod_id,
        (SELECT COUNT(*) FROM students s WHERE s.department_id = d.id),
        (SELECT COUNT(*) FROM staff s WHERE s.department_id = d.id)
     FROM departments d";

fn load_department(conn: &Connection, id: &str) -> LedgerResult<Department> {
    let sql = format!("{} WHERE d.id = ?", DEPARTMENT_SELECT);
    conn.query_row(&sql, [id], department_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "department" })
}

pub fn create_department(conn: &Connection, caller: &Caller, code: &str, name: &str) -> LedgerResult<Department> {
    caller.require_management("create departments")?;
    let code = code.trim().to_ascii_uppercase();
    let name = name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(LedgerError::bad_params("code and name are required"));
    }
    taken(conn, "SELECT id FROM departments WHERE code = ?", &code, "department code")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO departments(id, code, name) VALUES(?, ?, ?)",
        (&id, &code, name),
    )?;
    tracing::info!(department_id = %id, code = %code, "department created");
    load_department(conn, &id)
}

pub fn list_departments(conn: &Connection) -> LedgerResult<Vec<Department>> {
    let sql = format!("{} ORDER BY d.code", DEPARTMENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], department_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_department(
    conn: &Connection,
    caller: &Caller,
    id: &str,
    code: Option<&str>,
    name: Option<&str>,
) -> LedgerResult<Department> {
    caller.require_management("edit departments")?;
    load_department(conn, id)?;
    let code = code.map(|c| c.trim().to_ascii_uppercase());
    let name = name.map(str::trim);
    if code.as_deref() == Some("") || name == Some("") {
        return Err(LedgerError::bad_params("code and name must not be empty"));
    }
    if let Some(c) = code.as_deref() {
        taken_by_other(conn, "SELECT id FROM departments WHERE code = ?1 AND id != ?2", c, id, "department code")?;
    }
    conn.execute(
        "UPDATE departments SET code = COALESCE(?1, code), name = COALESCE(?2, name) WHERE id = ?3",
        (&code, name, id),
    )?;
    tracing::info!(department_id = id, "department updated");
    load_department(conn, id)
}

fn count_in(conn: &Connection, sql: &str, id: &str) -> LedgerResult<i64> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

/// Refused while students, staff, subjects, fee structures or timetable
/// entries still belong to it.
pub fn delete_department(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    caller.require_management("delete departments")?;
    let dept = load_department(conn, id)?;
    let blockers = [
        (dept.student_count, "students"),
        (dept.staff_count, "staff members"),
        (
            count_in(conn, "SELECT COUNT(*) FROM subjects WHERE department_id = ?", id)?,
            "subjects",
        ),
        (
            count_in(conn, "SELECT COUNT(*) FROM fee_structures WHERE department_id = ?", id)?,
            "fee structures",
        ),
        (
            count_in(conn, "SELECT COUNT(*) FROM timetable WHERE department_id = ?", id)?,
            "timetable entries",
        ),
    ];
    if let Some((count, what)) = blockers.iter().find(|(n, _)| *n > 0) {
        tracing::warn!(department_id = id, count, what, "department delete refused");
        return Err(LedgerError::Integrity {
            message: format!("cannot delete department: it has {} {}", count, what),
            dependents: *count,
        });
    }
    conn.execute("DELETE FROM departments WHERE id = ?", [id])?;
    tracing::info!(department_id = id, "department deleted");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewSubject {
    pub code: String,
    pub name: String,
    pub department_id: String,
    pub year: i64,
    pub semester: i64,
    pub credits: i64,
    pub is_lab: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
    pub department_id: String,
    pub year: i64,
    pub semester: i64,
    pub credits: i64,
    pub is_lab: bool,
}

const SUBJECT_SELECT: &str =
    "SELECT id, code, name, department_id, year, semester, credits, is_lab FROM subjects";

fn subject_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        department_id: r.get(3)?,
        year: r.get(4)?,
        semester: r.get(5)?,
        credits: r.get(6)?,
        is_lab: r.get::<_, i64>(7)? != 0,
    })
}

fn load_subject(conn: &Connection, id: &str) -> LedgerResult<Subject> {
    let sql = format!("{} WHERE id = ?", SUBJECT_SELECT);
    conn.query_row(&sql, [id], subject_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "subject" })
}

pub fn create_subject(conn: &Connection, caller: &Caller, input: &NewSubject) -> LedgerResult<Subject> {
    caller.require_department_admin(&input.department_id, "create subjects")?;
    let code = input.code.trim().to_ascii_uppercase();
    let name = input.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(LedgerError::bad_params("code and name are required"));
    }
    validate_year(input.year)?;
    if !(1..=8).contains(&input.semester) {
        return Err(LedgerError::bad_params("semester must be in 1..=8"));
    }
    if !(1..=10).contains(&input.credits) {
        return Err(LedgerError::bad_params("credits must be in 1..=10"));
    }
    require_row(conn, "departments", &input.department_id, "department")?;
    taken(conn, "SELECT id FROM subjects WHERE code = ?", &code, "subject code")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, code, name, department_id, year, semester, credits, is_lab)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &code,
            name,
            &input.department_id,
            input.year,
            input.semester,
            input.credits,
            input.is_lab as i64,
        ),
    )?;
    tracing::info!(subject_id = %id, code = %code, "subject created");
    load_subject(conn, &id)
}

pub fn list_subjects(conn: &Connection, department_id: Option<&str>) -> LedgerResult<Vec<Subject>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR department_id = ?1) ORDER BY year, semester, code",
        SUBJECT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([department_id], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct SubjectPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub credits: Option<i64>,
    pub is_lab: Option<bool>,
}

/// The owning department is fixed; everything else may change.
pub fn update_subject(conn: &Connection, caller: &Caller, id: &str, patch: &SubjectPatch) -> LedgerResult<Subject> {
    let subject = load_subject(conn, id)?;
    caller.require_department_admin(&subject.department_id, "edit subjects")?;
    let code = trimmed(&patch.code, "code")?.map(str::to_ascii_uppercase);
    let name = trimmed(&patch.name, "name")?;
    if let Some(year) = patch.year {
        validate_year(year)?;
    }
    if patch.semester.is_some_and(|s| !(1..=8).contains(&s)) {
        return Err(LedgerError::bad_params("semester must be in 1..=8"));
    }
    if patch.credits.is_some_and(|c| !(1..=10).contains(&c)) {
        return Err(LedgerError::bad_params("credits must be in 1..=10"));
    }
    if let Some(c) = code.as_deref() {
        taken_by_other(conn, "SELECT id FROM subjects WHERE code = ?1 AND id != ?2", c, id, "subject code")?;
    }
    conn.execute(
        "UPDATE subjects SET code = COALESCE(?1, code), name = COALESCE(?2, name),
            year = COALESCE(?3, year), semester = COALESCE(?4, semester),
            credits = COALESCE(?5, credits), is_lab = COALESCE(?6, is_lab)
         WHERE id = ?7",
        (
            &code,
            name,
            patch.year,
            patch.semester,
            patch.credits,
            patch.is_lab.map(i64::from),
            id,
        ),
    )?;
    tracing::info!(subject_id = id, "subject updated");
    load_subject(conn, id)
}

/// Refused while sessions, exams or timetable rows reference the subject.
/// Its staff assignments go with it.
pub fn delete_subject(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    let subject = load_subject(conn, id)?;
    caller.require_department_admin(&subject.department_id, "delete subjects")?;
    let dependents: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM attendance_sessions WHERE subject_id = ?1)
              + (SELECT COUNT(*) FROM exams WHERE subject_id = ?1)
              + (SELECT COUNT(*) FROM timetable WHERE subject_id = ?1)",
        [id],
        |r| r.get(0),
    )?;
    if dependents > 0 {
        tracing::warn!(subject_id = id, dependents, "subject delete refused");
        return Err(LedgerError::Integrity {
            message: format!(
                "cannot delete subject: {} attendance sessions, exams or timetable entries reference it",
                dependents
            ),
            dependents,
        });
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM staff_assignments WHERE subject_id = ?", [id])?;
    tx.execute("UPDATE feedback SET subject_id = NULL WHERE subject_id = ?", [id])?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [id])?;
    tx.commit()?;
    tracing::info!(subject_id = id, "subject deleted");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub staff_id: String,
    pub staff_name: String,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub year: i64,
    pub department_id: String,
    pub assigned_date: String,
}

const ASSIGNMENT_SELECT: &str = "SELECT a.id, a.staff_id, sf.name, a.subject_id, sub.code, sub.name, a.year,
        a.department_id, a.assigned_date
     FROM staff_assignments a
     JOIN staff sf ON sf.id = a.staff_id
     JOIN subjects sub ON sub.id = a.subject_id";

fn assignment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        staff_id: r.get(1)?,
        staff_name: r.get(2)?,
        subject_id: r.get(3)?,
        subject_code: r.get(4)?,
        subject_name: r.get(5)?,
        year: r.get(6)?,
        department_id: r.get(7)?,
        assigned_date: r.get(8)?,
    })
}

pub fn create_assignment(
    conn: &Connection,
    caller: &Caller,
    staff_id: &str,
    subject_id: &str,
    year: i64,
) -> LedgerResult<Assignment> {
    validate_year(year)?;
    let subject = load_subject(conn, subject_id)?;
    caller.require_department_admin(&subject.department_id, "assign staff")?;
    let staff_department: Option<String> = conn
        .query_row("SELECT department_id FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
        .optional()?;
    match staff_department {
        None => return Err(LedgerError::NotFound { entity: "staff member" }),
        Some(d) if d != subject.department_id => {
            return Err(LedgerError::bad_params(
                "staff member belongs to a different department",
            ))
        }
        Some(_) => {}
    }
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM staff_assignments WHERE staff_id = ? AND subject_id = ? AND year = ?",
            (staff_id, subject_id, year),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        tracing::warn!(assignment_id = %id, "assignment already exists");
        return Err(LedgerError::conflict_with("this assignment already exists", id));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO staff_assignments(id, staff_id, subject_id, year, department_id, assigned_date)
         VALUES(?, ?, ?, ?, ?, date('now'))",
        (&id, staff_id, subject_id, year, &subject.department_id),
    )?;
    tracing::info!(assignment_id = %id, staff_id, subject_id, year, "staff assigned to subject");
    load_assignment(conn, &id)
}

/// A HOD sees its own department; management may filter by any.
pub fn list_assignments(conn: &Connection, caller: &Caller, department_id: Option<&str>) -> LedgerResult<Vec<Assignment>> {
    let department = match caller.role {
        Role::Management => department_id.map(str::to_string),
        Role::Hod => caller.department_id.clone(),
        _ => {
            caller.require_any(&[Role::Management, Role::Hod], "list staff assignments")?;
            None
        }
    };
    let sql = format!(
        "{} WHERE (?1 IS NULL OR a.department_id = ?1) ORDER BY sub.code, a.year, sf.name",
        ASSIGNMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([department], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentPatch {
    pub staff_id: Option<String>,
    pub subject_id: Option<String>,
    pub year: Option<i64>,
    pub assigned_date: Option<NaiveDate>,
}

fn load_assignment(conn: &Connection, id: &str) -> LedgerResult<Assignment> {
    let sql = format!("{} WHERE a.id = ?", ASSIGNMENT_SELECT);
    conn.query_row(&sql, [id], assignment_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "assignment" })
}

/// Re-points an assignment. The result obeys the same rules as a new one:
/// staff and subject share a department the caller administers, and no
/// other assignment holds the same staff, subject and year.
pub fn update_assignment(conn: &Connection, caller: &Caller, id: &str, patch: &AssignmentPatch) -> LedgerResult<Assignment> {
    let current = load_assignment(conn, id)?;
    caller.require_department_admin(&current.department_id, "edit staff assignments")?;
    let staff_id = patch.staff_id.as_deref().unwrap_or(&current.staff_id);
    let subject_id = patch.subject_id.as_deref().unwrap_or(&current.subject_id);
    let year = patch.year.unwrap_or(current.year);
    validate_year(year)?;

    let subject = load_subject(conn, subject_id)?;
    caller.require_department_admin(&subject.department_id, "edit staff assignments")?;
    let staff_department: String = conn
        .query_row("SELECT department_id FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "staff member" })?;
    if staff_department != subject.department_id {
        return Err(LedgerError::bad_params(
            "staff member belongs to a different department",
        ));
    }
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM staff_assignments WHERE staff_id = ? AND subject_id = ? AND year = ? AND id != ?",
            (staff_id, subject_id, year, id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(other) = existing {
        tracing::warn!(assignment_id = %other, "assignment already exists");
        return Err(LedgerError::conflict_with("this assignment already exists", other));
    }

    conn.execute(
        "UPDATE staff_assignments SET staff_id = ?1, subject_id = ?2, year = ?3, department_id = ?4,
            assigned_date = COALESCE(?5, assigned_date)
         WHERE id = ?6",
        (
            staff_id,
            subject_id,
            year,
            &subject.department_id,
            patch.assigned_date.map(|d| d.format("%Y-%m-%d").to_string()),
            id,
        ),
    )?;
    tracing::info!(assignment_id = id, staff_id, subject_id, year, "staff assignment updated");
    load_assignment(conn, id)
}

pub fn delete_assignment(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    let department_id: String = conn
        .query_row(
            "SELECT department_id FROM staff_assignments WHERE id = ?",
            [id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "assignment" })?;
    caller.require_department_admin(&department_id, "remove staff assignments")?;
    conn.execute("DELETE FROM staff_assignments WHERE id = ?", [id])?;
    tracing::info!(assignment_id = id, "staff assignment removed");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentListing {
    pub id: String,
    pub user_id: String,
    pub roll_number: String,
    pub name: String,
    pub year: i64,
    pub semester: i64,
    pub section: String,
    pub department_id: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub department_id: Option<String>,
    pub year: Option<i64>,
    pub section: Option<String>,
}

pub fn list_students(conn: &Connection, caller: &Caller, filter: &StudentFilter) -> LedgerResult<Vec<StudentListing>> {
    caller.require_any(&[Role::Staff, Role::Hod, Role::Management], "list students")?;
    let department = filter
        .department_id
        .clone()
        .or_else(|| caller.role.is_teaching().then(|| caller.department_id.clone()).flatten());
    let section = filter
        .section
        .as_deref()
        .map(validate_section)
        .transpose()?;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, roll_number, name, year, semester, section, department_id, phone
         FROM students
         WHERE (?1 IS NULL OR department_id = ?1)
           AND (?2 IS NULL OR year = ?2)
           AND (?3 IS NULL OR section = ?3)
         ORDER BY roll_number",
    )?;
    let rows = stmt
        .query_map((department, filter.year, section), |r| {
            Ok(StudentListing {
                id: r.get(0)?,
                user_id: r.get(1)?,
                roll_number: r.get(2)?,
                name: r.get(3)?,
                year: r.get(4)?,
                semester: r.get(5)?,
                section: r.get(6)?,
                department_id: r.get(7)?,
                phone: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::resolve_caller;
    use crate::db;
    use crate::ledger::testutil::fixture;

    fn management_user(username: &str, employee_id: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{}@example.edu", username),
            role: Some(Role::Management),
            name: "Principal".into(),
            employee_id: Some(employee_id.into()),
            ..NewUser::default()
        }
    }

    #[test]
    fn first_management_user_needs_no_actor() {
        let conn = db::open_in_memory().expect("db");
        let student = NewUser {
            role: Some(Role::Student),
            ..management_user("x", "E1")
        };
        assert_eq!(create_user(&conn, None, &student).expect_err("not first").code(), "forbidden");
        let admin = create_user(&conn, None, &management_user("admin", "M1")).expect("bootstrap");
        assert_eq!(admin.role, "management");
        let again = create_user(&conn, None, &management_user("admin2", "M2"));
        assert_eq!(again.expect_err("no actor").code(), "forbidden");
    }

    #[test]
    fn hod_creation_sets_department_head() {
        let f = fixture(0);
        let hod = create_user(
            &f.conn,
            Some(&f.management),
            &NewUser {
                username: "hod".into(),
                email: "hod@example.edu".into(),
                role: Some(Role::Hod),
                name: "Head".into(),
                department_id: Some("d1".into()),
                employee_id: Some("H001".into()),
                ..NewUser::default()
            },
        )
        .expect("hod");
        let dept = load_department(&f.conn, "d1").expect("dept");
        assert_eq!(dept.hod_id, hod.profile_id);
    }

    #[test]
    fn staff_registers_students_only_in_own_department() {
        let f = fixture(0);
        f.conn
            .execute("INSERT INTO departments(id, code, name) VALUES('d2', 'ECE', 'Electronics')", [])
            .expect("dept");
        let mut input = NewUser {
            username: "new".into(),
            email: "new@example.edu".into(),
            role: Some(Role::Student),
            name: "New Student".into(),
            roll_number: Some("R900".into()),
            year: Some(2),
            section: Some("b".into()),
            ..NewUser::default()
        };
        let created = create_user(&f.conn, Some(&f.teacher), &input).expect("own department");
        assert_eq!(created.department_id.as_deref(), Some("d1"));

        input.username = "other".into();
        input.email = "other@example.edu".into();
        input.roll_number = Some("R901".into());
        input.department_id = Some("d2".into());
        let e = create_user(&f.conn, Some(&f.teacher), &input).expect_err("other department");
        assert_eq!(e.code(), "forbidden");

        input.role = Some(Role::Staff);
        input.department_id = None;
        let e = create_user(&f.conn, Some(&f.teacher), &input).expect_err("staff creating staff");
        assert_eq!(e.code(), "forbidden");
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let f = fixture(0);
        let e = create_user(&f.conn, Some(&f.management), &management_user("u-t1", "M9"))
            .expect_err("duplicate");
        assert_eq!(e.code(), "conflict");
    }

    #[test]
    fn department_delete_reports_student_count() {
        let f = fixture(3);
        match delete_department(&f.conn, &f.management, "d1") {
            Err(LedgerError::Integrity { dependents, message }) => {
                assert_eq!(dependents, 3);
                assert!(message.contains("3 students"));
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
        let empty = create_department(&f.conn, &f.management, "mech", "Mechanical").expect("create");
        assert_eq!(empty.code, "MECH");
        delete_department(&f.conn, &f.management, &empty.id).expect("delete empty");
    }

    #[test]
    fn department_delete_counts_fee_structures_and_timetable() {
        use crate::ledger::fees::{self, NewStructure};
        use chrono::NaiveDate;

        let f = fixture(0);
        let mech = create_department(&f.conn, &f.management, "MECH", "Mechanical").expect("mech");
        fees::create_structure(
            &f.conn,
            &f.management,
            &NewStructure {
                academic_year: "2024-25".into(),
                year: 1,
                department_id: Some(mech.id.clone()),
                fee_type: None,
                amount: 1000.0,
                due_date: NaiveDate::from_ymd_opt(2024, 9, 1).expect("date"),
                description: None,
            },
        )
        .expect("structure");
        match delete_department(&f.conn, &f.management, &mech.id) {
            Err(LedgerError::Integrity { dependents, message }) => {
                assert_eq!(dependents, 1);
                assert!(message.contains("fee structures"));
            }
            other => panic!("expected integrity error, got {:?}", other),
        }

        let civil = create_department(&f.conn, &f.management, "CIVIL", "Civil").expect("civil");
        f.conn
            .execute(
                "INSERT INTO timetable(id, department_id, year, section, day_of_week, period, subject_id, staff_id, is_active)
                 VALUES('tt1', ?, 1, 'A', 0, 1, 'sub1', 't1', 0)",
                [&civil.id],
            )
            .expect("timetable row");
        let e = delete_department(&f.conn, &f.management, &civil.id).expect_err("timetable");
        assert_eq!(e.code(), "integrity");
    }

    #[test]
    fn subject_with_sessions_cannot_be_deleted() {
        let f = fixture(0);
        f.conn
            .execute(
                "INSERT INTO attendance_sessions(id, subject_id, staff_id, date, period, year, section, department_id, created_at)
                 VALUES('as1', 'sub1', 't1', '2024-01-01', 1, 1, 'A', 'd1', '2024-01-01T00:00:00Z')",
                [],
            )
            .expect("session");
        let e = delete_subject(&f.conn, &f.management, "sub1").expect_err("referenced");
        assert_eq!(e.code(), "integrity");

        let s = create_subject(
            &f.conn,
            &f.management,
            &NewSubject {
                code: "cs102".into(),
                name: "Data Structures".into(),
                department_id: "d1".into(),
                year: 1,
                semester: 2,
                credits: 4,
                is_lab: false,
            },
        )
        .expect("subject");
        create_assignment(&f.conn, &f.management, "t1", &s.id, 1).expect("assign");
        delete_subject(&f.conn, &f.management, &s.id).expect("delete with assignment");
    }

    #[test]
    fn duplicate_assignment_points_at_existing_row() {
        let f = fixture(0);
        let e = create_assignment(&f.conn, &f.management, "t1", "sub1", 1).expect_err("duplicate");
        assert_eq!(e.details(), Some(serde_json::json!({ "existingId": "a-t1" })));
        let e = create_assignment(&f.conn, &f.teacher, "t1", "sub1", 2).expect_err("staff");
        assert_eq!(e.code(), "forbidden");
    }

    fn hod_input(username: &str, department_id: &str, employee_id: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{}@example.edu", username),
            role: Some(Role::Hod),
            name: "Head".into(),
            department_id: Some(department_id.into()),
            employee_id: Some(employee_id.into()),
            ..NewUser::default()
        }
    }

    #[test]
    fn user_edit_checks_uniqueness_against_other_rows() {
        let f = fixture(2);
        let same = update_user(
            &f.conn,
            &f.management,
            "u-s1",
            &UserPatch {
                username: Some("u-s1".into()),
                roll_number: Some("R001".into()),
                name: Some("Renamed".into()),
                section: Some("b".into()),
                ..UserPatch::default()
            },
        )
        .expect("keeping own values");
        assert_eq!(same.name.as_deref(), Some("Renamed"));

        let e = update_user(
            &f.conn,
            &f.management,
            "u-s1",
            &UserPatch {
                roll_number: Some("R002".into()),
                ..UserPatch::default()
            },
        )
        .expect_err("roll number of s2");
        assert_eq!(e.details(), Some(serde_json::json!({ "existingId": "s2" })));

        let e = update_user(
            &f.conn,
            &f.management,
            "u-t1",
            &UserPatch {
                employee_id: Some("E002".into()),
                ..UserPatch::default()
            },
        )
        .expect_err("employee id of t2");
        assert_eq!(e.code(), "conflict");

        let e = update_user(
            &f.conn,
            &f.management,
            "u-t1",
            &UserPatch {
                roll_number: Some("R900".into()),
                ..UserPatch::default()
            },
        )
        .expect_err("student field on staff");
        assert_eq!(e.code(), "bad_params");
    }

    #[test]
    fn user_edit_scope_follows_creation_rules() {
        let f = fixture(1);
        let rename = UserPatch {
            name: Some("New Name".into()),
            ..UserPatch::default()
        };
        update_user(&f.conn, &f.teacher, "u-s1", &rename).expect("staff edits own student");
        let e = update_user(&f.conn, &f.teacher, "u-t2", &rename).expect_err("staff edits staff");
        assert_eq!(e.code(), "forbidden");
        let e = update_user(&f.conn, &f.students[0], "u-s1", &rename).expect_err("student");
        assert_eq!(e.code(), "forbidden");
    }

    #[test]
    fn moving_a_hod_moves_the_department_head() {
        let f = fixture(0);
        let ece = create_department(&f.conn, &f.management, "ECE", "Electronics").expect("ece");
        let hod = create_user(&f.conn, Some(&f.management), &hod_input("hod", "d1", "H001")).expect("hod");
        let moved = update_user(
            &f.conn,
            &f.management,
            &hod.id,
            &UserPatch {
                department_id: Some(ece.id.clone()),
                ..UserPatch::default()
            },
        )
        .expect("move");
        assert_eq!(moved.department_id.as_deref(), Some(ece.id.as_str()));
        assert_eq!(load_department(&f.conn, "d1").expect("d1").hod_id, None);
        assert_eq!(load_department(&f.conn, &ece.id).expect("ece").hod_id, hod.profile_id);

        // t1 still teaches sub1 in d1.
        let e = update_user(
            &f.conn,
            &f.management,
            "u-t1",
            &UserPatch {
                department_id: Some(ece.id.clone()),
                ..UserPatch::default()
            },
        )
        .expect_err("assigned staff");
        assert_eq!(e.code(), "integrity");
    }

    #[test]
    fn department_and_subject_codes_stay_unique_on_edit() {
        let f = fixture(0);
        let ece = create_department(&f.conn, &f.management, "ECE", "Electronics").expect("ece");
        let e = update_department(&f.conn, &f.management, &ece.id, Some("cse"), None).expect_err("taken");
        assert_eq!(e.details(), Some(serde_json::json!({ "existingId": "d1" })));
        let renamed = update_department(&f.conn, &f.management, &ece.id, Some("ece"), Some("E & C"))
            .expect("own code");
        assert_eq!((renamed.code.as_str(), renamed.name.as_str()), ("ECE", "E & C"));
        assert_eq!(
            update_department(&f.conn, &f.teacher, &ece.id, None, Some("x")).expect_err("staff").code(),
            "forbidden"
        );

        let other = create_subject(
            &f.conn,
            &f.management,
            &NewSubject {
                code: "CS102".into(),
                name: "Data Structures".into(),
                department_id: "d1".into(),
                year: 1,
                semester: 2,
                credits: 4,
                is_lab: false,
            },
        )
        .expect("subject");
        let e = update_subject(
            &f.conn,
            &f.management,
            &other.id,
            &SubjectPatch {
                code: Some("cs101".into()),
                ..SubjectPatch::default()
            },
        )
        .expect_err("code of sub1");
        assert_eq!(e.details(), Some(serde_json::json!({ "existingId": "sub1" })));
        let edited = update_subject(
            &f.conn,
            &f.management,
            &other.id,
            &SubjectPatch {
                credits: Some(2),
                is_lab: Some(true),
                ..SubjectPatch::default()
            },
        )
        .expect("edit");
        assert_eq!((edited.credits, edited.is_lab, edited.code.as_str()), (2, true, "CS102"));
    }

    #[test]
    fn assignment_edit_refuses_duplicates_but_not_itself() {
        let f = fixture(0);
        let moved = update_assignment(
            &f.conn,
            &f.management,
            "a-t1",
            &AssignmentPatch {
                year: Some(2),
                assigned_date: NaiveDate::from_ymd_opt(2024, 7, 1),
                ..AssignmentPatch::default()
            },
        )
        .expect("move year");
        assert_eq!((moved.year, moved.assigned_date.as_str()), (2, "2024-07-01"));

        let e = update_assignment(
            &f.conn,
            &f.management,
            "a-t2",
            &AssignmentPatch {
                staff_id: Some("t1".into()),
                year: Some(2),
                ..AssignmentPatch::default()
            },
        )
        .expect_err("same as a-t1");
        assert_eq!(e.details(), Some(serde_json::json!({ "existingId": "a-t1" })));

        update_assignment(&f.conn, &f.management, "a-t1", &AssignmentPatch::default()).expect("no-op");
        let e = update_assignment(&f.conn, &f.teacher, "a-t1", &AssignmentPatch::default())
            .expect_err("staff");
        assert_eq!(e.code(), "forbidden");
    }

    #[test]
    fn deactivated_user_cannot_act() {
        let f = fixture(1);
        set_active(&f.conn, &f.management, "u-s1", false).expect("deactivate");
        assert_eq!(resolve_caller(&f.conn, "u-s1").expect_err("inactive").code(), "forbidden");
        let listed = list_users(&f.conn, &f.management, Some(Role::Student)).expect("list");
        assert!(!listed[0].is_active);
    }

    #[test]
    fn staff_student_listing_defaults_to_own_department() {
        let f = fixture(2);
        let rows = list_students(&f.conn, &f.teacher, &StudentFilter::default()).expect("list");
        assert_eq!(rows.len(), 2);
        let filtered = list_students(
            &f.conn,
            &f.teacher,
            &StudentFilter {
                section: Some("b".into()),
                ..StudentFilter::default()
            },
        )
        .expect("filter");
        assert!(filtered.is_empty());
        assert!(list_students(&f.conn, &f.students[0], &StudentFilter::default()).is_err());
    }
}
