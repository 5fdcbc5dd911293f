//! Append-only per-user inbox. Rows are never edited except for the read
//! flag, and there is no delivery channel beyond the persisted row.

use super::{new_id, now_ts};
use crate::auth::{Caller, Role};
use crate::error::LedgerResult;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    LowAttendance,
    UtilityComplaint,
    AcademicComplaint,
    StaffFeedback,
    GeneralFeedback,
    NewNotice,
    ResultUploaded,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowAttendance => "low_attendance",
            Self::UtilityComplaint => "utility_complaint",
            Self::AcademicComplaint => "academic_complaint",
            Self::StaffFeedback => "staff_feedback",
            Self::GeneralFeedback => "general_feedback",
            Self::NewNotice => "new_notice",
            Self::ResultUploaded => "result_uploaded",
        }
    }
}

/// What a notification points at, e.g. `("attendance", subject_id)`.
#[derive(Debug, Clone, Copy)]
pub struct Reference<'a> {
    pub kind: &'a str,
    pub id: &'a str,
}

pub fn notify(
    conn: &Connection,
    user_id: &str,
    kind: Kind,
    title: &str,
    message: &str,
    reference: Option<Reference<'_>>,
) -> LedgerResult<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO notifications(id, user_id, notification_type, title, message, is_read, reference_type, reference_id, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?, ?, ?)",
        (
            &id,
            user_id,
            kind.as_str(),
            title,
            message,
            reference.map(|r| r.kind),
            reference.map(|r| r.id),
            now_ts(),
        ),
    )?;
    tracing::debug!(user_id, kind = kind.as_str(), "notification appended");
    Ok(id)
}

/// Active users holding any of `roles`.
pub fn active_users_with_roles(conn: &Connection, roles: &[Role]) -> LedgerResult<Vec<String>> {
    let mut out = Vec::new();
    let mut stmt =
        conn.prepare("SELECT id FROM users WHERE role = ? AND is_active = 1 ORDER BY created_at, id")?;
    for role in roles {
        let ids = stmt
            .query_map([role.as_str()], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        out.extend(ids);
    }
    Ok(out)
}

pub fn active_users(conn: &Connection) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM users WHERE is_active = 1 ORDER BY created_at, id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_at: String,
}

pub fn list(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, notification_type, title, message, is_read, reference_type, reference_id, created_at
         FROM notifications
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([&caller.user_id], |r| {
            Ok(Notification {
                id: r.get(0)?,
                notification_type: r.get(1)?,
                title: r.get(2)?,
                message: r.get(3)?,
                is_read: r.get::<_, i64>(4)? != 0,
                reference_type: r.get(5)?,
                reference_id: r.get(6)?,
                created_at: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn unread_count(conn: &Connection, caller: &Caller) -> LedgerResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        [&caller.user_id],
        |r| r.get(0),
    )?)
}

/// Only the addressee can mark its own notification; anything else reads as
/// "not marked" rather than an error.
pub fn mark_read(conn: &Connection, caller: &Caller, notification_id: &str) -> LedgerResult<bool> {
    let n = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
        (notification_id, &caller.user_id),
    )?;
    Ok(n > 0)
}

pub fn mark_all_read(conn: &Connection, caller: &Caller) -> LedgerResult<usize> {
    let n = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0",
        [&caller.user_id],
    )?;
    tracing::info!(user_id = %caller.user_id, marked = n, "notifications marked read");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::fixture;

    #[test]
    fn inbox_counts_and_marks_only_own_rows() {
        let f = fixture(2);
        let a = &f.students[0];
        let b = &f.students[1];
        let first = notify(&f.conn, &a.user_id, Kind::NewNotice, "Notice", "one", None)
            .expect("notify");
        notify(
            &f.conn,
            &a.user_id,
            Kind::ResultUploaded,
            "Result",
            "two",
            Some(Reference { kind: "marks", id: "e1" }),
        )
        .expect("notify");
        notify(&f.conn, &b.user_id, Kind::NewNotice, "Notice", "three", None).expect("notify");

        assert_eq!(unread_count(&f.conn, a).expect("count"), 2);
        assert!(!mark_read(&f.conn, b, &first).expect("foreign mark"));
        assert!(mark_read(&f.conn, a, &first).expect("own mark"));
        assert_eq!(unread_count(&f.conn, a).expect("count"), 1);

        let items = list(&f.conn, a).expect("list");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].reference_id.as_deref(), Some("e1"));

        assert_eq!(mark_all_read(&f.conn, a).expect("all"), 1);
        assert_eq!(unread_count(&f.conn, a).expect("count"), 0);
        assert_eq!(unread_count(&f.conn, b).expect("count"), 1);
    }

    #[test]
    fn role_lookup_skips_inactive_users() {
        let f = fixture(1);
        f.conn
            .execute("UPDATE users SET is_active = 0 WHERE id = 'u-t2'", [])
            .expect("deactivate");
        let staff = active_users_with_roles(&f.conn, &[Role::Staff, Role::Hod]).expect("lookup");
        assert_eq!(staff, vec!["u-t1".to_string()]);
    }
}
