use crate::auth::{self, Caller};
use crate::calc;
use crate::error::LedgerError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::BatchEntry;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> Self {
        match &e {
            LedgerError::Db(db) => tracing::error!(error = %db, "database error"),
            LedgerError::Corrupt(message) => tracing::error!(%message, "unreadable stored row"),
            _ => {}
        }
        Self {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for HandlerErr {
    fn from(e: serde_json::Error) -> Self {
        Self {
            code: "internal",
            message: e.to_string(),
            details: None,
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Turns a handler outcome into the wire reply for `req`.
pub fn reply(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            if e.code != "bad_params" {
                tracing::warn!(method = %req.method, code = e.code, message = %e.message, "request rejected");
            }
            e.response(&req.id)
        }
    }
}

pub fn to_value<T: Serialize>(v: &T) -> HandlerResult {
    Ok(serde_json::to_value(v)?)
}

pub fn db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    })
}

/// Resolves `params.actor` to the caller an operation runs for.
pub fn actor(conn: &Connection, params: &Value) -> Result<Caller, HandlerErr> {
    let unknown = |message: String| HandlerErr {
        code: "unknown_actor",
        message,
        details: None,
    };
    let Some(user_id) = params.get("actor").and_then(|v| v.as_str()) else {
        return Err(unknown("missing actor".into()));
    };
    match auth::resolve_caller(conn, user_id) {
        Ok(c) => Ok(c),
        Err(LedgerError::NotFound { .. }) => Err(unknown(format!("unknown actor: {}", user_id))),
        Err(e) => Err(e.into()),
    }
}

/// Workspace connection plus resolved caller; every ledger method starts here.
pub fn session<'a>(state: &'a AppState, req: &Request) -> Result<(&'a Connection, Caller), HandlerErr> {
    let conn = db(state)?;
    let caller = actor(conn, &req.params)?;
    Ok((conn, caller))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    get_optional_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?, key)
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    get_optional_str(params, key)?
        .map(|s| parse_date(&s, key))
        .transpose()
}

pub fn get_optional_ts(params: &Value, key: &str) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    get_optional_str(params, key)?
        .map(|s| {
            calc::parse_ts(&s)
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an RFC 3339 timestamp", key)))
        })
        .transpose()
}

/// `params.asOf` for time-dependent methods; defaults to the wall clock.
pub fn as_of(params: &Value) -> Result<DateTime<Utc>, HandlerErr> {
    Ok(get_optional_ts(params, "asOf")?.unwrap_or_else(Utc::now))
}

fn get_object<'a>(params: &'a Value, key: &str) -> Result<&'a serde_json::Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

/// `{studentId: bool | "present" | "absent"}`; anything else is carried as
/// a per-entry parse failure.
pub fn presence_map(params: &Value, key: &str) -> Result<HashMap<String, BatchEntry<bool>>, HandlerErr> {
    let obj = get_object(params, key)?;
    Ok(obj
        .iter()
        .map(|(student_id, v)| {
            let parsed = match v {
                Value::Bool(b) => Ok(*b),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "present" | "true" => Ok(true),
                    "absent" | "false" => Ok(false),
                    other => Err(format!("unrecognised presence value: {}", other)),
                },
                other => Err(format!("presence must be boolean, got {}", other)),
            };
            (student_id.clone(), parsed)
        })
        .collect())
}

/// `{studentId: number | null | "numeric string"}`. Null means absent; an
/// empty string leaves the student's mark untouched.
pub fn marks_map(params: &Value, key: &str) -> Result<HashMap<String, BatchEntry<Option<f64>>>, HandlerErr> {
    let obj = get_object(params, key)?;
    let mut out = HashMap::with_capacity(obj.len());
    for (student_id, v) in obj {
        let parsed = match v {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("unrepresentable mark: {}", n)),
            Value::String(s) if s.trim().is_empty() => continue,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("not a number: {}", s.trim())),
            other => Err(format!("mark must be a number, got {}", other)),
        };
        out.insert(student_id.clone(), parsed);
    }
    Ok(out)
}

pub fn get_str_list(params: &Value, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    }
}
