use std::path::PathBuf;

pub const LOG_ENV: &str = "CAMPUSD_LOG";
pub const WORKSPACE_ENV: &str = "CAMPUSD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process settings read from the environment at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Self {
            log_filter: non_empty(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}
