//! Identity and academic structure: users, departments, subjects,
//! staff-subject assignments and student listings.

use crate::auth::Role;
use crate::ipc::helpers::{
    actor, db, get_optional_bool, get_optional_date, get_optional_i64, get_optional_str,
    get_required_i64, get_required_str, reply, session, to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::catalog::{
    self, AssignmentPatch, NewSubject, NewUser, StudentFilter, SubjectPatch, UserPatch,
};
use serde_json::{json, Value};

fn parse_role(raw: Option<String>) -> Result<Option<Role>, HandlerErr> {
    raw.map(|r| {
        Role::parse(&r)
            .ok_or_else(|| HandlerErr::bad_params("role must be student, staff, hod or management"))
    })
    .transpose()
}

/// `actor` may be omitted only while the workspace has no management user.
fn handle_users_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db(state)?;
    let p = &req.params;
    let caller = match p.get("actor") {
        None | Some(Value::Null) => None,
        Some(_) => Some(actor(conn, p)?),
    };
    let input = NewUser {
        username: get_required_str(p, "username")?,
        email: get_required_str(p, "email")?,
        role: parse_role(get_optional_str(p, "role")?)?,
        name: get_required_str(p, "name")?,
        department_id: get_optional_str(p, "departmentId")?,
        roll_number: get_optional_str(p, "rollNumber")?,
        year: get_optional_i64(p, "year")?,
        semester: get_optional_i64(p, "semester")?,
        section: get_optional_str(p, "section")?,
        phone: get_optional_str(p, "phone")?,
        employee_id: get_optional_str(p, "employeeId")?,
        designation: get_optional_str(p, "designation")?,
    };
    to_value(&catalog::create_user(conn, caller.as_ref(), &input)?)
}

fn handle_users_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let role = parse_role(get_optional_str(&req.params, "role")?)?;
    Ok(json!({ "users": catalog::list_users(conn, &caller, role)? }))
}

fn handle_users_set_active(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let user_id = get_required_str(&req.params, "userId")?;
    let active = get_optional_bool(&req.params, "isActive")?
        .ok_or_else(|| HandlerErr::bad_params("missing isActive"))?;
    to_value(&catalog::set_active(conn, &caller, &user_id, active)?)
}

fn handle_users_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let user_id = get_required_str(p, "userId")?;
    let patch = UserPatch {
        username: get_optional_str(p, "username")?,
        email: get_optional_str(p, "email")?,
        name: get_optional_str(p, "name")?,
        department_id: get_optional_str(p, "departmentId")?,
        roll_number: get_optional_str(p, "rollNumber")?,
        year: get_optional_i64(p, "year")?,
        semester: get_optional_i64(p, "semester")?,
        section: get_optional_str(p, "section")?,
        phone: get_optional_str(p, "phone")?,
        employee_id: get_optional_str(p, "employeeId")?,
        designation: get_optional_str(p, "designation")?,
    };
    to_value(&catalog::update_user(conn, &caller, &user_id, &patch)?)
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let code = get_required_str(&req.params, "code")?;
    let name = get_required_str(&req.params, "name")?;
    to_value(&catalog::create_department(conn, &caller, &code, &name)?)
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, _caller) = session(state, req)?;
    Ok(json!({ "departments": catalog::list_departments(conn)? }))
}

fn handle_departments_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "departmentId")?;
    let code = get_optional_str(&req.params, "code")?;
    let name = get_optional_str(&req.params, "name")?;
    to_value(&catalog::update_department(
        conn,
        &caller,
        &id,
        code.as_deref(),
        name.as_deref(),
    )?)
}

fn handle_departments_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "departmentId")?;
    catalog::delete_department(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let year = get_required_i64(p, "year")?;
    let input = NewSubject {
        code: get_required_str(p, "code")?,
        name: get_required_str(p, "name")?,
        department_id: get_required_str(p, "departmentId")?,
        year,
        semester: get_optional_i64(p, "semester")?.unwrap_or(year * 2 - 1),
        credits: get_optional_i64(p, "credits")?.unwrap_or(3),
        is_lab: get_optional_bool(p, "isLab")?.unwrap_or(false),
    };
    to_value(&catalog::create_subject(conn, &caller, &input)?)
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, _caller) = session(state, req)?;
    let department_id = get_optional_str(&req.params, "departmentId")?;
    Ok(json!({ "subjects": catalog::list_subjects(conn, department_id.as_deref())? }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let id = get_required_str(p, "subjectId")?;
    let patch = SubjectPatch {
        code: get_optional_str(p, "code")?,
        name: get_optional_str(p, "name")?,
        year: get_optional_i64(p, "year")?,
        semester: get_optional_i64(p, "semester")?,
        credits: get_optional_i64(p, "credits")?,
        is_lab: get_optional_bool(p, "isLab")?,
    };
    to_value(&catalog::update_subject(conn, &caller, &id, &patch)?)
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "subjectId")?;
    catalog::delete_subject(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let staff_id = get_required_str(p, "staffId")?;
    let subject_id = get_required_str(p, "subjectId")?;
    let year = get_required_i64(p, "year")?;
    to_value(&catalog::create_assignment(conn, &caller, &staff_id, &subject_id, year)?)
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let department_id = get_optional_str(&req.params, "departmentId")?;
    let rows = catalog::list_assignments(conn, &caller, department_id.as_deref())?;
    Ok(json!({ "assignments": rows }))
}

fn handle_assignments_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let id = get_required_str(p, "assignmentId")?;
    let patch = AssignmentPatch {
        staff_id: get_optional_str(p, "staffId")?,
        subject_id: get_optional_str(p, "subjectId")?,
        year: get_optional_i64(p, "year")?,
        assigned_date: get_optional_date(p, "assignedDate")?,
    };
    to_value(&catalog::update_assignment(conn, &caller, &id, &patch)?)
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "assignmentId")?;
    catalog::delete_assignment(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let filter = StudentFilter {
        department_id: get_optional_str(p, "departmentId")?,
        year: get_optional_i64(p, "year")?,
        section: get_optional_str(p, "section")?,
    };
    Ok(json!({ "students": catalog::list_students(conn, &caller, &filter)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "users.create" => handle_users_create(state, req),
        "users.list" => handle_users_list(state, req),
        "users.setActive" => handle_users_set_active(state, req),
        "users.update" => handle_users_update(state, req),
        "departments.create" => handle_departments_create(state, req),
        "departments.list" => handle_departments_list(state, req),
        "departments.update" => handle_departments_update(state, req),
        "departments.delete" => handle_departments_delete(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        "assignments.create" => handle_assignments_create(state, req),
        "assignments.list" => handle_assignments_list(state, req),
        "assignments.update" => handle_assignments_update(state, req),
        "assignments.delete" => handle_assignments_delete(state, req),
        "students.list" => handle_students_list(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
