use crate::ipc::helpers::{as_of, reply, session, to_value, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::ledger::dashboard;
use serde_json::Value;

fn handle_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let now = as_of(&req.params)?;
    to_value(&dashboard::summary(conn, &state.policy, &caller, now)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "dashboard.summary" => handle_summary(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
