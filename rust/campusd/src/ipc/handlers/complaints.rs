use crate::ipc::helpers::{get_optional_str, get_required_str, reply, session, to_value, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::ledger::complaints::{self, ComplaintType, NewComplaint};
use serde_json::{json, Value};

fn handle_submit(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let raw_type = get_required_str(p, "complaintType")?;
    let complaint_type = ComplaintType::parse(&raw_type)
        .ok_or_else(|| HandlerErr::bad_params("complaintType must be utility or academic"))?;
    let input = NewComplaint {
        complaint_type,
        subject: get_required_str(p, "subject")?,
        description: get_required_str(p, "description")?,
        priority: get_optional_str(p, "priority")?,
        assigned_to: get_optional_str(p, "assignedTo")?,
    };
    to_value(&complaints::submit(conn, &caller, &input)?)
}

fn handle_respond(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let id = get_required_str(p, "complaintId")?;
    let message = get_required_str(p, "message")?;
    let status = get_required_str(p, "status")?;
    to_value(&complaints::respond(conn, &caller, &id, &message, &status)?)
}

fn handle_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "complaintId")?;
    to_value(&complaints::get(conn, &caller, &id)?)
}

fn handle_mine(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "complaints": complaints::mine(conn, &caller)? }))
}

fn handle_all(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let status = get_optional_str(&req.params, "status")?;
    let complaint_type = get_optional_str(&req.params, "type")?;
    let rows = complaints::all(conn, &caller, status.as_deref(), complaint_type.as_deref())?;
    Ok(json!({ "complaints": rows }))
}

fn handle_assigned(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "complaints": complaints::assigned(conn, &caller)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "complaints.submit" => handle_submit(state, req),
        "complaints.respond" => handle_respond(state, req),
        "complaints.get" => handle_get(state, req),
        "complaints.mine" => handle_mine(state, req),
        "complaints.all" => handle_all(state, req),
        "complaints.assigned" => handle_assigned(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
