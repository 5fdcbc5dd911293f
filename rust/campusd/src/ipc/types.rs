use std::path::PathBuf;

use crate::policy::Policy;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Process-wide state: the selected workspace, its open connection and the
/// institution policy loaded from it.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub policy: Policy,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            policy: Policy::default(),
        }
    }
}
