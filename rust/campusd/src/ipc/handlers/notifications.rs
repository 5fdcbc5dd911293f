use crate::ipc::helpers::{get_required_str, reply, session, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::ledger::notify;
use serde_json::{json, Value};

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let notifications = notify::list(conn, &caller)?;
    let unread = notifications.iter().filter(|n| !n.is_read).count();
    Ok(json!({ "notifications": notifications, "unread": unread }))
}

fn handle_unread_count(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "count": notify::unread_count(conn, &caller)? }))
}

fn handle_mark_read(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "notificationId")?;
    let marked = notify::mark_read(conn, &caller, &id)?;
    Ok(json!({ "marked": marked }))
}

fn handle_mark_all_read(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    Ok(json!({ "marked": notify::mark_all_read(conn, &caller)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "notifications.list" => handle_list(state, req),
        "notifications.unreadCount" => handle_unread_count(state, req),
        "notifications.markRead" => handle_mark_read(state, req),
        "notifications.markAllRead" => handle_mark_all_read(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
