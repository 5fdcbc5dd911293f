use super::notify::{self, Kind, Reference};
use super::{new_id, now_ts, require_row};
use crate::auth::{Caller, Role};
use crate::error::{LedgerError, LedgerResult};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct NewFeedback {
    /// `general` or `staff`.
    pub feedback_type: String,
    pub content: String,
    pub rating: i64,
    pub is_anonymous: bool,
    pub target_staff_id: Option<String>,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub feedback_type: String,
    pub content: String,
    pub rating: i64,
    pub is_anonymous: bool,
    /// Hidden from everyone but the submitter when anonymous.
    pub submitted_by: Option<String>,
    pub target_staff_id: Option<String>,
    pub subject_id: Option<String>,
    pub status: String,
    pub created_at: String,
}

fn query(conn: &Connection, filter: &str, params: impl rusqlite::Params, reveal: bool) -> LedgerResult<Vec<Feedback>> {
    let sql = format!(
        "SELECT id, feedback_type, content, rating, is_anonymous, submitted_by, target_staff_id,
                subject_id, status, created_at
         FROM feedback
         WHERE {}
         ORDER BY created_at DESC, rowid DESC",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |r| {
            let is_anonymous = r.get::<_, i64>(4)? != 0;
            let submitter: String = r.get(5)?;
            Ok(Feedback {
                id: r.get(0)?,
                feedback_type: r.get(1)?,
                content: r.get(2)?,
                rating: r.get(3)?,
                is_anonymous,
                submitted_by: (reveal || !is_anonymous).then_some(submitter),
                target_staff_id: r.get(6)?,
                subject_id: r.get(7)?,
                status: r.get(8)?,
                created_at: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub feedback_id: String,
    pub notifications_created: usize,
}

/// Staff feedback with a target reaches that staff member and management;
/// everything else reaches all teaching staff and management.
pub fn submit(conn: &Connection, caller: &Caller, input: &NewFeedback) -> LedgerResult<Submitted> {
    let student_id = caller.student_id()?.to_string();
    if !matches!(input.feedback_type.as_str(), "general" | "staff") {
        return Err(LedgerError::bad_params("feedbackType must be general or staff"));
    }
    if !(1..=5).contains(&input.rating) {
        return Err(LedgerError::bad_params("rating must be in 1..=5"));
    }
    if input.content.trim().is_empty() {
        return Err(LedgerError::bad_params("content must not be empty"));
    }
    if let Some(id) = input.target_staff_id.as_deref() {
        require_row(conn, "staff", id, "staff member")?;
    }
    if let Some(id) = input.subject_id.as_deref() {
        require_row(conn, "subjects", id, "subject")?;
    }

    let id = new_id();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO feedback(id, feedback_type, content, rating, is_anonymous, submitted_by, target_staff_id, subject_id, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'submitted', ?)",
        (
            &id,
            &input.feedback_type,
            input.content.trim(),
            input.rating,
            input.is_anonymous as i64,
            &student_id,
            &input.target_staff_id,
            &input.subject_id,
            now_ts(),
        ),
    )?;

    let reference = Some(Reference {
        kind: "feedback",
        id: &id,
    });
    let mut sent = 0;
    match (input.feedback_type.as_str(), input.target_staff_id.as_deref()) {
        ("staff", Some(staff_id)) => {
            let staff_user: String =
                tx.query_row("SELECT user_id FROM staff WHERE id = ?", [staff_id], |r| r.get(0))?;
            notify::notify(
                &tx,
                &staff_user,
                Kind::StaffFeedback,
                "New Feedback Received",
                &format!("You have received new feedback (Rating: {}/5).", input.rating),
                reference,
            )?;
            sent += 1;
            for user_id in notify::active_users_with_roles(&tx, &[Role::Management])? {
                notify::notify(
                    &tx,
                    &user_id,
                    Kind::StaffFeedback,
                    "New Staff Feedback",
                    &format!("New staff feedback received (Rating: {}/5).", input.rating),
                    reference,
                )?;
                sent += 1;
            }
        }
        _ => {
            let message = format!("New general feedback received (Rating: {}/5).", input.rating);
            for user_id in
                notify::active_users_with_roles(&tx, &[Role::Staff, Role::Hod, Role::Management])?
            {
                notify::notify(
                    &tx,
                    &user_id,
                    Kind::GeneralFeedback,
                    "New General Feedback",
                    &message,
                    reference,
                )?;
                sent += 1;
            }
        }
    }
    tx.commit()?;
    tracing::info!(feedback_id = %id, notifications = sent, "feedback submitted");
    Ok(Submitted {
        feedback_id: id,
        notifications_created: sent,
    })
}

pub fn mine(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Feedback>> {
    let student_id = caller.student_id()?;
    query(conn, "submitted_by = ?", [student_id], true)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Received {
    pub feedback: Vec<Feedback>,
    pub average_rating: f64,
}

pub fn received(conn: &Connection, caller: &Caller) -> LedgerResult<Received> {
    let staff_id = caller.staff_id()?;
    let feedback = query(conn, "target_staff_id = ?", [staff_id], false)?;
    let average_rating = if feedback.is_empty() {
        0.0
    } else {
        feedback.iter().map(|f| f.rating as f64).sum::<f64>() / feedback.len() as f64
    };
    Ok(Received {
        feedback,
        average_rating,
    })
}

pub fn all(conn: &Connection, caller: &Caller, feedback_type: Option<&str>) -> LedgerResult<Vec<Feedback>> {
    caller.require_management("view all feedback")?;
    query(conn, "(?1 IS NULL OR feedback_type = ?1)", [feedback_type], false)
}
