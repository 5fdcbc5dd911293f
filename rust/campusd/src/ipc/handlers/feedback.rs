use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_i64, get_required_str, reply, session,
    to_value, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::feedback::{self, NewFeedback};
use serde_json::{json, Value};

fn handle_submit(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewFeedback {
        feedback_type: get_required_str(p, "feedbackType")?,
        content: get_required_str(p, "content")?,
        rating: get_required_i64(p, "rating")?,
        is_anonymous: get_optional_bool(p, "isAnonymous")?.unwrap_or(false),
        target_staff_id: get_optional_str(p, "targetStaffId")?,
        subject_id: get_optional_str(p, "subjectId")?,
    };
    to_value(&feedback::submit(conn, &caller, &input)?)
}

fn handle_mine(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "feedback": feedback::mine(conn, &caller)? }))
}

fn handle_received(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    to_value(&feedback::received(conn, &caller)?)
}

fn handle_all(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let feedback_type = get_optional_str(&req.params, "type")?;
    Ok(json!({ "feedback": feedback::all(conn, &caller, feedback_type.as_deref())? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "feedback.submit" => handle_submit(state, req),
        "feedback.mine" => handle_mine(state, req),
        "feedback.received" => handle_received(state, req),
        "feedback.all" => handle_all(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
