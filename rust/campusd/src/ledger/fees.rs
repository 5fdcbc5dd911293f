use super::{new_id, now_ts, require_row, validate_year};
use crate::auth::Caller;
use crate::calc::{self, PaymentStatus};
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

pub const FEE_TYPES: &[&str] = &["tuition", "exam", "library", "lab", "sports", "other"];

#[derive(Debug, Clone)]
pub struct NewStructure {
    pub academic_year: String,
    pub year: i64,
    pub department_id: Option<String>,
    pub fee_type: Option<String>,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    pub id: String,
    pub academic_year: String,
    pub year: i64,
    pub department_id: Option<String>,
    pub fee_type: Option<String>,
    pub amount: f64,
    pub due_date: String,
    pub description: Option<String>,
    pub assigned: i64,
}

fn structure_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Structure> {
    Ok(Structure {
        id: r.get(0)?,
        academic_year: r.get(1)?,
        year: r.get(2)?,
        department_id: r.get(3)?,
        fee_type: r.get(4)?,
        amount: r.get(5)?,
        due_date: r.get(6)?,
        description: r.get(7)?,
        assigned: r.get(8)?,
    })
}

const STRUCTURE_SELECT: &str = "SELECT f.id, f.academic_year, f.year, f.department_id, f.fee_type, f.amount,
        f.due_date, f.description,
        (SELECT COUNT(*) FROM student_fees sf WHERE sf.fee_structure_id = f.id)
     FROM fee_structures f";

fn load_structure(conn: &Connection, id: &str) -> LedgerResult<Structure> {
    let sql = format!("{} WHERE f.id = ?", STRUCTURE_SELECT);
    conn.query_row(&sql, [id], structure_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "fee structure" })
}

pub fn create_structure(conn: &Connection, caller: &Caller, input: &NewStructure) -> LedgerResult<Structure> {
    caller.require_management("create fee structures")?;
    let academic_year = input.academic_year.trim();
    if academic_year.is_empty() {
        return Err(LedgerError::bad_params("academicYear must not be empty"));
    }
    validate_year(input.year)?;
    if !input.amount.is_finite() || input.amount < 0.0 {
        return Err(LedgerError::bad_params("amount must be a non-negative number"));
    }
    if let Some(t) = input.fee_type.as_deref() {
        if !FEE_TYPES.contains(&t) {
            return Err(LedgerError::bad_params(format!(
                "feeType must be one of {}",
                FEE_TYPES.join(", ")
            )));
        }
    }
    if let Some(d) = input.department_id.as_deref() {
        require_row(conn, "departments", d, "department")?;
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO fee_structures(id, academic_year, year, department_id, fee_type, amount, due_date, description, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            academic_year,
            input.year,
            &input.department_id,
            &input.fee_type,
            input.amount,
            input.due_date.to_string(),
            &input.description,
            now_ts(),
        ),
    )?;
    tracing::info!(fee_structure_id = %id, amount = input.amount, "fee structure created");
    load_structure(conn, &id)
}

pub fn list_structures(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<Structure>> {
    caller.require_management("view fee structures")?;
    let sql = format!("{} ORDER BY f.created_at DESC, f.rowid DESC", STRUCTURE_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], structure_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Refused while any student fee still points at the structure.
pub fn delete_structure(conn: &Connection, caller: &Caller, id: &str) -> LedgerResult<()> {
    caller.require_management("delete fee structures")?;
    let structure = load_structure(conn, id)?;
    if structure.assigned > 0 {
        tracing::warn!(fee_structure_id = id, assigned = structure.assigned, "fee structure delete refused");
        return Err(LedgerError::Integrity {
            message: format!(
                "fee structure is assigned to {} student(s)",
                structure.assigned
            ),
            dependents: structure.assigned,
        });
    }
    conn.execute("DELETE FROM fee_structures WHERE id = ?", [id])?;
    tracing::info!(fee_structure_id = id, "fee structure deleted");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignReport {
    pub fee_structure_id: String,
    pub created: usize,
    pub already_assigned: usize,
    pub skipped: Vec<String>,
}

/// Creates a student fee for every student in the structure's scope that
/// does not already have one. `only` narrows the scope to listed students;
/// listed ids outside the scope are reported in `skipped`.
pub fn assign(
    conn: &Connection,
    caller: &Caller,
    structure_id: &str,
    only: Option<&[String]>,
) -> LedgerResult<AssignReport> {
    caller.require_management("assign fees")?;
    let structure = load_structure(conn, structure_id)?;

    let mut stmt = conn.prepare(
        "SELECT id FROM students
         WHERE year = ?1 AND (?2 IS NULL OR department_id = ?2)
         ORDER BY roll_number",
    )?;
    let mut in_scope = stmt
        .query_map((structure.year, &structure.department_id), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut skipped = Vec::new();
    if let Some(only) = only {
        for id in only {
            if !in_scope.contains(id) {
                skipped.push(id.clone());
            }
        }
        in_scope.retain(|id| only.contains(id));
    }

    let mut report = AssignReport {
        fee_structure_id: structure.id.clone(),
        created: 0,
        already_assigned: 0,
        skipped,
    };
    let ts = now_ts();
    let tx = conn.unchecked_transaction()?;
    for student_id in &in_scope {
        let n = tx.execute(
            "INSERT INTO student_fees(id, student_id, fee_structure_id, amount_due, amount_paid, payment_status, created_at, updated_at)
             VALUES(?, ?, ?, ?, 0, 'pending', ?, ?)
             ON CONFLICT(student_id, fee_structure_id) DO NOTHING",
            (new_id(), student_id, &structure.id, structure.amount, &ts, &ts),
        )?;
        if n > 0 {
            report.created += 1;
        } else {
            report.already_assigned += 1;
        }
    }
    tx.commit()?;

    if !report.skipped.is_empty() {
        tracing::warn!(fee_structure_id = structure_id, skipped = report.skipped.len(), "students outside fee scope");
    }
    tracing::info!(
        fee_structure_id = structure_id,
        created = report.created,
        already_assigned = report.already_assigned,
        "fees assigned"
    );
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFee {
    pub id: String,
    pub student_id: String,
    pub fee_structure_id: String,
    pub academic_year: String,
    pub fee_type: Option<String>,
    pub due_date: String,
    pub amount_due: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub payment_status: String,
    pub payment_date: Option<String>,
    pub transaction_id: Option<String>,
    pub remarks: Option<String>,
}

const STUDENT_FEE_SELECT: &str = "SELECT sf.id, sf.student_id, sf.fee_structure_id, f.academic_year, f.fee_type,
        f.due_date, sf.amount_due, sf.amount_paid, sf.payment_status, sf.payment_date,
        sf.transaction_id, sf.remarks
     FROM student_fees sf
     JOIN fee_structures f ON f.id = sf.fee_structure_id";

fn student_fee_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentFee> {
    let amount_due: f64 = r.get(6)?;
    let amount_paid: f64 = r.get(7)?;
    Ok(StudentFee {
        id: r.get(0)?,
        student_id: r.get(1)?,
        fee_structure_id: r.get(2)?,
        academic_year: r.get(3)?,
        fee_type: r.get(4)?,
        due_date: r.get(5)?,
        amount_due,
        amount_paid,
        balance: calc::fee_balance(amount_due, amount_paid),
        payment_status: r.get(8)?,
        payment_date: r.get(9)?,
        transaction_id: r.get(10)?,
        remarks: r.get(11)?,
    })
}

fn load_student_fee(conn: &Connection, id: &str) -> LedgerResult<StudentFee> {
    let sql = format!("{} WHERE sf.id = ?", STUDENT_FEE_SELECT);
    conn.query_row(&sql, [id], student_fee_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "student fee" })
}

#[derive(Debug, Clone, Default)]
pub struct Payment {
    /// Total paid so far, replacing the previous figure.
    pub amount_paid: f64,
    pub transaction_id: Option<String>,
    pub remarks: Option<String>,
}

pub fn record_payment(conn: &Connection, caller: &Caller, student_fee_id: &str, payment: &Payment) -> LedgerResult<StudentFee> {
    caller.require_management("record payments")?;
    if !payment.amount_paid.is_finite() || payment.amount_paid < 0.0 {
        return Err(LedgerError::bad_params("amountPaid must be a non-negative number"));
    }
    let current = load_student_fee(conn, student_fee_id)?;
    let status = calc::payment_status(current.amount_due, payment.amount_paid);
    let ts = now_ts();
    let payment_date = (payment.amount_paid > 0.0).then(|| ts.clone());
    conn.execute(
        "UPDATE student_fees SET
           amount_paid = ?, payment_status = ?, payment_date = COALESCE(?, payment_date),
           transaction_id = COALESCE(?, transaction_id), remarks = COALESCE(?, remarks), updated_at = ?
         WHERE id = ?",
        (
            payment.amount_paid,
            status.as_str(),
            payment_date,
            &payment.transaction_id,
            &payment.remarks,
            &ts,
            student_fee_id,
        ),
    )?;
    let updated = load_student_fee(conn, student_fee_id)?;
    if status == PaymentStatus::Paid && updated.balance < 0.0 {
        tracing::warn!(student_fee_id, balance = updated.balance, "payment exceeds amount due");
    }
    tracing::info!(
        student_fee_id,
        amount_paid = payment.amount_paid,
        status = status.as_str(),
        "payment recorded"
    );
    Ok(updated)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFee {
    pub student_fee_id: String,
    pub student_id: String,
    pub roll_number: String,
    pub student_name: String,
    pub amount_due: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub payment_status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentPending {
    pub department: String,
    pub count: usize,
    pub total: f64,
    pub fees: Vec<PendingFee>,
}

/// Every fee not yet paid, grouped by the student's department name.
pub fn pending_report(conn: &Connection, caller: &Caller) -> LedgerResult<Vec<DepartmentPending>> {
    caller.require_management("view the pending fee report")?;
    let mut stmt = conn.prepare(
        "SELECT sf.id, st.id, st.roll_number, st.name, COALESCE(d.name, 'Unknown'),
                sf.amount_due, sf.amount_paid, sf.payment_status
         FROM student_fees sf
         JOIN students st ON st.id = sf.student_id
         LEFT JOIN departments d ON d.id = st.department_id
         WHERE sf.payment_status != 'paid'
         ORDER BY sf.created_at DESC, st.roll_number",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let amount_due: f64 = r.get(5)?;
            let amount_paid: f64 = r.get(6)?;
            Ok((
                r.get::<_, String>(4)?,
                PendingFee {
                    student_fee_id: r.get(0)?,
                    student_id: r.get(1)?,
                    roll_number: r.get(2)?,
                    student_name: r.get(3)?,
                    amount_due,
                    amount_paid,
                    balance: calc::fee_balance(amount_due, amount_paid),
                    payment_status: r.get(7)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_department: BTreeMap<String, DepartmentPending> = BTreeMap::new();
    for (department, fee) in rows {
        let entry = by_department
            .entry(department.clone())
            .or_insert_with(|| DepartmentPending {
                department,
                count: 0,
                total: 0.0,
                fees: Vec::new(),
            });
        entry.count += 1;
        entry.total += fee.balance;
        entry.fees.push(fee);
    }
    Ok(by_department.into_values().collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyFees {
    pub fees: Vec<StudentFee>,
    pub total_due: f64,
    pub total_paid: f64,
    pub balance: f64,
}

pub fn my_fees(conn: &Connection, caller: &Caller) -> LedgerResult<MyFees> {
    let student_id = caller.student_id()?;
    let sql = format!(
        "{} WHERE sf.student_id = ? ORDER BY sf.created_at DESC, sf.rowid DESC",
        STUDENT_FEE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let fees = stmt
        .query_map([student_id], student_fee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let total_due: f64 = fees.iter().map(|f| f.amount_due).sum();
    let total_paid: f64 = fees.iter().map(|f| f.amount_paid).sum();
    Ok(MyFees {
        balance: calc::fee_balance(total_due, total_paid),
        fees,
        total_due,
        total_paid,
    })
}
