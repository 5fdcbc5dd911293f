use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_f64, get_required_i64, get_required_str,
    get_str_list, reply, session, to_value, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::fees::{self, NewStructure, Payment};
use serde_json::{json, Value};

fn handle_create_structure(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewStructure {
        academic_year: get_required_str(p, "academicYear")?,
        year: get_required_i64(p, "year")?,
        department_id: get_optional_str(p, "departmentId")?,
        fee_type: get_optional_str(p, "feeType")?,
        amount: get_required_f64(p, "amount")?,
        due_date: get_required_date(p, "dueDate")?,
        description: get_optional_str(p, "description")?,
    };
    to_value(&fees::create_structure(conn, &caller, &input)?)
}

fn handle_structures(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let structures = fees::list_structures(conn, &caller)?;
    Ok(json!({ "structures": structures }))
}

fn handle_delete_structure(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "feeStructureId")?;
    fees::delete_structure(conn, &caller, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_assign(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let id = get_required_str(&req.params, "feeStructureId")?;
    let only = get_str_list(&req.params, "studentIds")?;
    to_value(&fees::assign(conn, &caller, &id, only.as_deref())?)
}

fn handle_record_payment(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let student_fee_id = get_required_str(p, "studentFeeId")?;
    let payment = Payment {
        amount_paid: get_required_f64(p, "amountPaid")?,
        transaction_id: get_optional_str(p, "transactionId")?,
        remarks: get_optional_str(p, "remarks")?,
    };
    to_value(&fees::record_payment(conn, &caller, &student_fee_id, &payment)?)
}

fn handle_pending_report(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let departments = fees::pending_report(conn, &caller)?;
    Ok(json!({ "departments": departments }))
}

fn handle_my_fees(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    to_value(&fees::my_fees(conn, &caller)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "fees.createStructure" => handle_create_structure(state, req),
        "fees.structures" => handle_structures(state, req),
        "fees.deleteStructure" => handle_delete_structure(state, req),
        "fees.assign" => handle_assign(state, req),
        "fees.recordPayment" => handle_record_payment(state, req),
        "fees.pendingReport" => handle_pending_report(state, req),
        "fees.myFees" => handle_my_fees(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
