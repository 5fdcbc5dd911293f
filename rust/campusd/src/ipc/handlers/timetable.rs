use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_i64, get_required_str, reply, session,
    to_value, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::timetable::{self, EntryFilter, NewEntry};
use serde_json::{json, Value};

fn handle_create_entry(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewEntry {
        department_id: get_required_str(p, "departmentId")?,
        year: get_required_i64(p, "year")?,
        section: get_required_str(p, "section")?,
        day_of_week: get_required_i64(p, "dayOfWeek")?,
        period: get_required_i64(p, "period")?,
        subject_id: get_required_str(p, "subjectId")?,
        staff_id: get_required_str(p, "staffId")?,
        room: get_optional_str(p, "room")?,
    };
    to_value(&timetable::create_entry(conn, &caller, &input)?)
}

fn handle_remove_entry(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "entryId")?;
    timetable::remove_entry(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_my_timetable(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "entries": timetable::my_timetable(conn, &caller)? }))
}

fn handle_staff_schedule(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "entries": timetable::staff_schedule(conn, &caller)? }))
}

fn handle_manage(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let filter = EntryFilter {
        department_id: get_optional_str(p, "departmentId")?,
        year: get_optional_i64(p, "year")?,
        section: get_optional_str(p, "section")?,
    };
    Ok(json!({ "entries": timetable::manage(conn, &caller, &filter)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "timetable.createEntry" => handle_create_entry(state, req),
        "timetable.removeEntry" => handle_remove_entry(state, req),
        "timetable.myTimetable" => handle_my_timetable(state, req),
        "timetable.staffSchedule" => handle_staff_schedule(state, req),
        "timetable.manage" => handle_manage(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
