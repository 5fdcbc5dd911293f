use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SETTINGS_KEY: &str = "setup.policy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub grade: String,
}

/// Institution-wide business thresholds. Loaded once per workspace and handed
/// to every ledger operation by reference; ledgers never hard-code these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub attendance_floor_percent: f64,
    pub attendance_min_classes: i64,
    pub loan_period_days: i64,
    pub fine_per_day: f64,
    /// Highest band first. A percentage lands in the first band whose
    /// `min_percent` it reaches.
    pub grade_bands: Vec<GradeBand>,
    pub failing_grade: String,
    pub absent_grade: String,
}

impl Default for Policy {
    fn default() -> Self {
        let band = |min_percent: f64, grade: &str| GradeBand {
            min_percent,
            grade: grade.to_string(),
        };
        Self {
            attendance_floor_percent: 75.0,
            attendance_min_classes: 5,
            loan_period_days: 14,
            fine_per_day: 5.0,
            grade_bands: vec![
                band(90.0, "O"),
                band(80.0, "A+"),
                band(70.0, "A"),
                band(60.0, "B+"),
                band(50.0, "B"),
                band(40.0, "C"),
            ],
            failing_grade: "F".to_string(),
            absent_grade: "AB".to_string(),
        }
    }
}

impl Policy {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Stored policy merged over defaults. A stored value that no longer parses
/// is ignored rather than blocking the workspace from opening.
pub fn load(conn: &Connection) -> anyhow::Result<Policy> {
    let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? else {
        return Ok(Policy::default());
    };
    match serde_json::from_value::<Policy>(saved) {
        Ok(p) => Ok(p),
        Err(e) => {
            tracing::warn!(error = %e, "stored policy is unreadable; using defaults");
            Ok(Policy::default())
        }
    }
}

pub fn save(conn: &Connection, policy: &Policy) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &policy.to_json())
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("{} must be a number", key))?;
    if n < min || n > max {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_grade_label(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim();
    if s.is_empty() || s.len() > 4 {
        return Err(format!("{} must be 1..=4 characters", key));
    }
    Ok(s.to_string())
}

fn parse_grade_bands(v: &Value) -> Result<Vec<GradeBand>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| "gradeBands must be an array".to_string())?;
    if arr.is_empty() {
        return Err("gradeBands must not be empty".into());
    }
    let mut bands = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let min_percent = item
            .get("minPercent")
            .ok_or_else(|| format!("gradeBands[{}].minPercent missing", i))
            .and_then(|m| parse_f64_range(m, "gradeBands.minPercent", 0.0, 100.0))?;
        let grade = item
            .get("grade")
            .ok_or_else(|| format!("gradeBands[{}].grade missing", i))
            .and_then(|g| parse_grade_label(g, "gradeBands.grade"))?;
        if let Some(prev) = bands.last().map(|b: &GradeBand| b.min_percent) {
            if min_percent >= prev {
                return Err("gradeBands must be strictly descending by minPercent".into());
            }
        }
        bands.push(GradeBand { min_percent, grade });
    }
    Ok(bands)
}

/// Applies a partial update, validating every field. Unknown fields reject
/// the whole patch.
pub fn merge_patch(current: &Policy, patch: &Map<String, Value>) -> Result<Policy, String> {
    let mut next = current.clone();
    for (k, v) in patch {
        match k.as_str() {
            "attendanceFloorPercent" => {
                next.attendance_floor_percent = parse_f64_range(v, k, 0.0, 100.0)?;
            }
            "attendanceMinClasses" => {
                next.attendance_min_classes = parse_i64_range(v, k, 1, 100)?;
            }
            "loanPeriodDays" => {
                next.loan_period_days = parse_i64_range(v, k, 1, 365)?;
            }
            "finePerDay" => {
                next.fine_per_day = parse_f64_range(v, k, 0.0, 1000.0)?;
            }
            "gradeBands" => {
                next.grade_bands = parse_grade_bands(v)?;
            }
            "failingGrade" => {
                next.failing_grade = parse_grade_label(v, k)?;
            }
            "absentGrade" => {
                next.absent_grade = parse_grade_label(v, k)?;
            }
            _ => return Err(format!("unknown policy field: {}", k)),
        }
    }
    Ok(next)
}
