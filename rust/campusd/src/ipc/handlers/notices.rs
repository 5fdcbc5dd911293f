use crate::ipc::helpers::{
    as_of, get_optional_str, get_optional_ts, get_required_str, reply, session, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::notices::{self, NewNotice};
use serde_json::{json, Value};

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewNotice {
        title: get_required_str(p, "title")?,
        content: get_required_str(p, "content")?,
        category: get_optional_str(p, "category")?.unwrap_or_else(|| "general".to_string()),
        priority: get_optional_str(p, "priority")?,
        target_audience: get_optional_str(p, "targetAudience")?,
        department_id: get_optional_str(p, "departmentId")?,
        expiry_date: get_optional_ts(p, "expiryDate")?,
    };
    let now = as_of(p)?;
    let (notice, sent) = notices::create(conn, &caller, &input, now)?;
    Ok(json!({ "notice": notice, "notificationsCreated": sent }))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, _caller) = session(state, req)?;
    let category = get_optional_str(&req.params, "category")?;
    let now = as_of(&req.params)?;
    Ok(json!({ "notices": notices::list(conn, category.as_deref(), now)? }))
}

fn handle_manage(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let now = as_of(&req.params)?;
    Ok(json!({ "notices": notices::manage(conn, &caller, now)? }))
}

fn handle_toggle(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "noticeId")?;
    let now = as_of(&req.params)?;
    Ok(json!({ "notice": notices::toggle(conn, &caller, &id, now)? }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "noticeId")?;
    notices::delete(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "notices.create" => handle_create(state, req),
        "notices.list" => handle_list(state, req),
        "notices.manage" => handle_manage(state, req),
        "notices.toggle" => handle_toggle(state, req),
        "notices.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
