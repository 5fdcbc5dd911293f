use super::notify::{self, Kind, Reference};
use super::{new_id, now_ts, require_row};
use crate::auth::{Caller, Role};
use crate::error::{LedgerError, LedgerResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const STATUSES: &[&str] = &["pending", "in_progress", "resolved", "closed"];
pub const PRIORITIES: &[&str] = &["low", "normal", "high"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintType {
    Utility,
    Academic,
}

impl ComplaintType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "utility" => Some(Self::Utility),
            "academic" => Some(Self::Academic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utility => "utility",
            Self::Academic => "academic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewComplaint {
    pub complaint_type: ComplaintType,
    pub subject: String,
    pub description: String,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub id: String,
    pub complaint_type: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub submitted_by: String,
    pub student_name: String,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
}

const COMPLAINT_SELECT: &str = "SELECT c.id, c.complaint_type, c.subject, c.description, c.status, c.priority,
        c.submitted_by, s.name, c.assigned_to, c.created_at, c.updated_at, c.resolved_at
     FROM complaints c
     JOIN students s ON s.id = c.submitted_by";

fn complaint_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Complaint> {
    Ok(Complaint {
        id: r.get(0)?,
        complaint_type: r.get(1)?,
        subject: r.get(2)?,
        description: r.get(3)?,
        status: r.get(4)?,
        priority: r.get(5)?,
        submitted_by: r.get(6)?,
        student_name: r.get(7)?,
        assigned_to: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
        resolved_at: r.get(11)?,
    })
}

fn load(conn: &Connection, id: &str) -> LedgerResult<Complaint> {
    let sql = format!("{} WHERE c.id = ?", COMPLAINT_SELECT);
    conn.query_row(&sql, [id], complaint_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "complaint" })
}

fn query(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> LedgerResult<Vec<Complaint>> {
    let sql = format!(
        "{} WHERE {} ORDER BY c.created_at DESC, c.rowid DESC",
        COMPLAINT_SELECT, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, complaint_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Files a complaint for the calling student. Utility complaints go to
/// management; academic ones to management and the assigned staff member.
pub fn submit(conn: &Connection, caller: &Caller, input: &NewComplaint) -> LedgerResult<Complaint> {
    let student_id = caller.student_id()?.to_string();
    let subject = input.subject.trim();
    if subject.is_empty() || subject.chars().count() > 200 {
        return Err(LedgerError::bad_params("subject must be 1..=200 characters"));
    }
    if input.description.trim().is_empty() {
        return Err(LedgerError::bad_params("description must not be empty"));
    }
    let priority = input.priority.as_deref().unwrap_or("normal");
    if !PRIORITIES.contains(&priority) {
        return Err(LedgerError::bad_params("priority must be low, normal or high"));
    }
    let assigned_to = match input.complaint_type {
        ComplaintType::Academic => input.assigned_to.clone(),
        ComplaintType::Utility => None,
    };
    if let Some(staff_id) = assigned_to.as_deref() {
        require_row(conn, "staff", staff_id, "staff member")?;
    }

    let id = new_id();
    let ts = now_ts();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO complaints(id, complaint_type, subject, description, status, priority, submitted_by, assigned_to, created_at, updated_at)
         VALUES(?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?)",
        (
            &id,
            input.complaint_type.as_str(),
            subject,
            input.description.trim(),
            priority,
            &student_id,
            &assigned_to,
            &ts,
            &ts,
        ),
    )?;

    let reference = Some(Reference {
        kind: "complaint",
        id: &id,
    });
    let (kind, title, message) = match input.complaint_type {
        ComplaintType::Utility => (
            Kind::UtilityComplaint,
            "New Utility Complaint",
            format!("New utility complaint: {}", subject),
        ),
        ComplaintType::Academic => (
            Kind::AcademicComplaint,
            "New Academic Complaint",
            format!("New academic complaint: {}", subject),
        ),
    };
    if let Some(staff_id) = assigned_to.as_deref() {
        let staff_user: String =
            tx.query_row("SELECT user_id FROM staff WHERE id = ?", [staff_id], |r| r.get(0))?;
        notify::notify(
            &tx,
            &staff_user,
            kind,
            "Academic Complaint Assigned",
            &format!("You have been assigned a complaint: {}", subject),
            reference,
        )?;
    }
    for user_id in notify::active_users_with_roles(&tx, &[Role::Management])? {
        notify::notify(&tx, &user_id, kind, title, &message, reference)?;
    }
    tx.commit()?;
    tracing::info!(complaint_id = %id, kind = input.complaint_type.as_str(), "complaint submitted");
    load(conn, &id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub responder_id: String,
    pub responder_name: String,
    pub message: String,
    pub created_at: String,
}

/// Adds a response and moves the complaint to `status`. Any status may
/// follow any other; entering `resolved` stamps the resolution time.
pub fn respond(conn: &Connection, caller: &Caller, complaint_id: &str, message: &str, status: &str) -> LedgerResult<Complaint> {
    caller.require_any(&[Role::Staff, Role::Hod, Role::Management], "respond to complaints")?;
    if message.trim().is_empty() {
        return Err(LedgerError::bad_params("message must not be empty"));
    }
    if !STATUSES.contains(&status) {
        return Err(LedgerError::bad_params(format!(
            "status must be one of {}",
            STATUSES.join(", ")
        )));
    }
    let before = load(conn, complaint_id)?;
    let ts = now_ts();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO complaint_responses(id, complaint_id, responder_id, message, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (new_id(), complaint_id, &caller.user_id, message.trim(), &ts),
    )?;
    tx.execute(
        "UPDATE complaints SET status = ?1, updated_at = ?2,
           resolved_at = CASE WHEN ?1 = 'resolved' THEN ?2 ELSE resolved_at END
         WHERE id = ?3",
        (status, &ts, complaint_id),
    )?;
    tx.commit()?;
    tracing::info!(complaint_id, from = %before.status, to = status, "complaint response added");
    load(conn, complaint_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintDetail {
    pub complaint: Complaint,
    pub responses: Vec<Response>,
}

/// Students may only open their own complaints.
pub fn get(conn: &Connection, caller: &Caller, complaint_id: &str) -> LedgerResult<ComplaintDetail> {
    let complaint = load(conn, complaint_id)?;
    if caller.role == Role::Student && caller.profile_id.as_deref() != Some(complaint.submitted_by.as_str()) {
        return Err(LedgerError::forbidden("you may only view your own complaints"));
    }
    let mut stmt = conn.prepare(
        "SELECT r.id, r.responder_id, u.username, r.message, r.created_at
         FROM complaint_responses r
         JOIN users u ON u.id = r.responder_id
         WHERE r.complaint_id = ?
         ORDER BY r.created_at DESC, r.rowid DESC",
    )?;
    let responses = stmt
        .query_map([complaint_id], |r| {
            Ok(Response {
                id: r.get(0)?,
                responder_id: r.get(1)?,
                responder_name: r.get(2)?,
                message: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ComplaintDetail {
        complaint,
        responses,
    })
}

pub fn mine(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Complaint>> {
    let student_id = caller.student_id()?;
    query(conn, "c.submitted_by = ?", [student_id])
}

pub fn all(conn: &Connection, caller: &Caller, status: Option<&str>, complaint_type: Option<&str>) -> LedgerResult<Vec<Complaint>> {
    caller.require_management("view all complaints")?;
    query(
        conn,
        "(?1 IS NULL OR c.status = ?1) AND (?2 IS NULL OR c.complaint_type = ?2)",
        (status, complaint_type),
    )
}

/// Academic complaints assigned to the caller or to nobody yet.
pub fn assigned(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Complaint>> {
    let staff_id = caller.staff_id()?;
    query(
        conn,
        "c.complaint_type = 'academic' AND (c.assigned_to = ? OR c.assigned_to IS NULL)",
        [staff_id],
    )
}
