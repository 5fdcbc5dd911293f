use crate::ipc::helpers::{actor, db, get_required_str, reply, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupSection {
    Policy,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "policy" => Some(Self::Policy),
            _ => None,
        }
    }
}

fn section(params: &Value) -> Result<SetupSection, HandlerErr> {
    let raw = get_required_str(params, "section")?;
    SetupSection::parse(&raw).ok_or_else(|| HandlerErr::bad_params("unknown section"))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db(state)?;
    match section(&req.params)? {
        SetupSection::Policy => {
            let current = policy::load(conn).map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?;
            Ok(json!({ "policy": current.to_json() }))
        }
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db(state)?;
    let caller = actor(conn, &req.params)?;
    caller.require_management("change institution policy")?;
    let SetupSection::Policy = section(&req.params)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let next = policy::merge_patch(&state.policy, patch).map_err(HandlerErr::bad_params)?;
    policy::save(conn, &next).map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: None,
    })?;
    tracing::info!(by = %caller.user_id, fields = patch.len(), "policy updated");
    state.policy = next;
    Ok(json!({ "policy": state.policy.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state, req),
        "setup.update" => handle_setup_update(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
