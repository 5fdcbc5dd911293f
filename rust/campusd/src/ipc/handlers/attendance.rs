use crate::ipc::helpers::{
    get_required_date, get_required_i64, get_required_str, presence_map, reply, session, to_value,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::attendance::{self, NewSession, SessionOutcome};
use serde_json::{json, Value};

fn handle_create_session(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewSession {
        subject_id: get_required_str(p, "subjectId")?,
        date: get_required_date(p, "date")?,
        period: get_required_i64(p, "period")?,
        year: get_required_i64(p, "year")?,
        section: get_required_str(p, "section")?,
    };
    let outcome = attendance::create_session(conn, &caller, &input)?;
    Ok(json!({
        "sessionId": outcome.session_id(),
        "created": matches!(outcome, SessionOutcome::Created(_)),
    }))
}

fn handle_mark_session(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let session_id = get_required_str(&req.params, "sessionId")?;
    let presence = presence_map(&req.params, "presence")?;
    let report = attendance::mark_session(conn, &state.policy, &caller, &session_id, &presence)?;
    to_value(&report)
}

fn handle_session_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let session_id = get_required_str(&req.params, "sessionId")?;
    to_value(&attendance::session_open(conn, &caller, &session_id)?)
}

fn handle_sessions(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let sessions = attendance::list_sessions(conn, &caller)?;
    Ok(json!({ "sessions": sessions }))
}

fn handle_my_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let subjects = attendance::my_summary(conn, &caller)?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    to_value(&attendance::summary_for(conn, &caller, &student_id, &subject_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.createSession" => handle_create_session(state, req),
        "attendance.markSession" => handle_mark_session(state, req),
        "attendance.sessionOpen" => handle_session_open(state, req),
        "attendance.sessions" => handle_sessions(state, req),
        "attendance.mySummary" => handle_my_summary(state, req),
        "attendance.summary" => handle_summary(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
