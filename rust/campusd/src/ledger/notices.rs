use super::notify::{self, Kind, Reference};
use super::{new_id, now_ts, require_row};
use crate::auth::Caller;
use crate::calc;
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const CATEGORIES: &[&str] = &["general", "academic", "event", "exam", "holiday"];
pub const PRIORITIES: &[&str] = &["low", "normal", "high", "urgent"];
pub const AUDIENCES: &[&str] = &["all", "students", "staff"];

#[derive(Debug, Clone)]
pub struct NewNotice {
    pub title: String,
    pub content: String,
    pub category: String,
    pub priority: Option<String>,
    pub target_audience: Option<String>,
    pub department_id: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub priority: String,
    pub target_audience: String,
    pub department_id: Option<String>,
    pub posted_by: String,
    pub is_active: bool,
    pub publish_date: String,
    pub expiry_date: Option<String>,
    pub expired: bool,
}

struct Row {
    notice: Notice,
    expiry: Option<DateTime<Utc>>,
}

const NOTICE_SELECT: &str = "SELECT id, title, content, category, priority, target_audience, department_id,
        posted_by, is_active, publish_date, expiry_date
     FROM notices";

fn notice_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let expiry_date: Option<String> = r.get(10)?;
    Ok(Row {
        expiry: expiry_date.as_deref().and_then(calc::parse_ts),
        notice: Notice {
            id: r.get(0)?,
            title: r.get(1)?,
            content: r.get(2)?,
            category: r.get(3)?,
            priority: r.get(4)?,
            target_audience: r.get(5)?,
            department_id: r.get(6)?,
            posted_by: r.get(7)?,
            is_active: r.get::<_, i64>(8)? != 0,
            publish_date: r.get(9)?,
            expiry_date,
            expired: false,
        },
    })
}

impl Row {
    fn at(mut self, now: DateTime<Utc>) -> Notice {
        self.notice.expired = self.expiry.is_some_and(|e| now > e);
        self.notice
    }
}

fn load(conn: &Connection, id: &str, now: DateTime<Utc>) -> LedgerResult<Notice> {
    let sql = format!("{} WHERE id = ?", NOTICE_SELECT);
    conn.query_row(&sql, [id], notice_row)
        .optional()?
        .map(|r| r.at(now))
        .ok_or(LedgerError::NotFound { entity: "notice" })
}

fn one_of(value: &str, allowed: &[&str], field: &str) -> LedgerResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(LedgerError::bad_params(format!(
            "{} must be one of {}",
            field,
            allowed.join(", ")
        )))
    }
}

/// Posts a notice and drops a copy in every active user's inbox.
pub fn create(conn: &Connection, caller: &Caller, input: &NewNotice, now: DateTime<Utc>) -> LedgerResult<(Notice, usize)> {
    let management_id = caller.management_id()?.to_string();
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(LedgerError::bad_params("title must be 1..=200 characters"));
    }
    if input.content.trim().is_empty() {
        return Err(LedgerError::bad_params("content must not be empty"));
    }
    one_of(&input.category, CATEGORIES, "category")?;
    let priority = input.priority.as_deref().unwrap_or("normal");
    one_of(priority, PRIORITIES, "priority")?;
    let audience = input.target_audience.as_deref().unwrap_or("all");
    one_of(audience, AUDIENCES, "targetAudience")?;
    if let Some(d) = input.department_id.as_deref() {
        require_row(conn, "departments", d, "department")?;
    }

    let id = new_id();
    let ts = calc::format_ts(now);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO notices(id, title, content, category, priority, target_audience, department_id, posted_by, is_active, publish_date, expiry_date, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        (
            &id,
            title,
            input.content.trim(),
            &input.category,
            priority,
            audience,
            &input.department_id,
            &management_id,
            &ts,
            input.expiry_date.map(calc::format_ts),
            &ts,
            &ts,
        ),
    )?;
    let mut sent = 0;
    for user_id in notify::active_users(&tx)? {
        notify::notify(
            &tx,
            &user_id,
            Kind::NewNotice,
            "New Notice Posted",
            title,
            Some(Reference {
                kind: "notice",
                id: &id,
            }),
        )?;
        sent += 1;
    }
    tx.commit()?;
    tracing::info!(notice_id = %id, notified = sent, "notice posted");
    Ok((load(conn, &id, now)?, sent))
}

fn priority_rank(priority: &str) -> usize {
    PRIORITIES.iter().position(|p| *p == priority).unwrap_or(1)
}

/// Active notices that have not expired as of `now`, most urgent first and
/// newest first within a priority.
pub fn list(conn: &Connection, category: Option<&str>, now: DateTime<Utc>) -> LedgerResult<Vec<Notice>> {
    let sql = format!(
        "{} WHERE is_active = 1 AND (?1 IS NULL OR category = ?1) ORDER BY created_at DESC, rowid DESC",
        NOTICE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows: Vec<Notice> = stmt
        .query_map([category], notice_row)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|r| r.at(now))
        .filter(|n| !n.expired)
        .collect();
    // Stable sort keeps the newest-first order inside each priority.
    rows.sort_by_key(|n| std::cmp::Reverse(priority_rank(&n.priority)));
    Ok(rows)
}

/// Every notice, including inactive and expired ones.
pub fn manage(conn: &Connection, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<Vec<Notice>> {
    caller.require_management("manage notices")?;
    let sql = format!("{} ORDER BY created_at DESC, rowid DESC", NOTICE_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], notice_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|r| r.at(now)).collect())
}

pub fn toggle(conn: &Connection, caller: &Caller, id: &str, now: DateTime<Utc>) -> LedgerResult<Notice> {
    caller.require_management("toggle notices")?;
    let n = conn.execute(
        "UPDATE notices SET is_active = 1 - is_active, updated_at = ? WHERE id = ?",
        (now_ts(), id),
    )?;
    if n == 0 {
        return Err(LedgerError::NotFound { entity: "notice" });
    }
    let notice = load(conn, id, now)?;
    tracing::info!(notice_id = id, active = notice.is_active, "notice toggled");
    Ok(notice)
}

pub fn delete(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    caller.require_management("delete notices")?;
    let n = conn.execute("DELETE FROM notices WHERE id = ?", [id])?;
    if n == 0 {
        return Err(LedgerError::NotFound { entity: "notice" });
    }
    tracing::info!(notice_id = id, "notice deleted");
    Ok(())
}
