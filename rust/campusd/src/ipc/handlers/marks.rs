use crate::ipc::helpers::{
    get_optional_date, get_required_f64, get_required_i64, get_required_str, marks_map, reply,
    session, to_value, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::assessment::{self, NewExam};
use serde_json::{json, Value};

fn handle_exams_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewExam {
        name: get_required_str(p, "name")?,
        exam_type: get_required_str(p, "examType")?,
        subject_id: get_required_str(p, "subjectId")?,
        max_marks: get_required_f64(p, "maxMarks")?,
        date: get_optional_date(p, "date")?,
        year: get_required_i64(p, "year")?,
        section: get_required_str(p, "section")?,
    };
    to_value(&assessment::create_exam(conn, &caller, &input)?)
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let exams = assessment::list_exams(conn, &caller)?;
    Ok(json!({ "exams": exams }))
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let marks_deleted = assessment::delete_exam(conn, &caller, &exam_id)?;
    Ok(json!({ "ok": true, "marksDeleted": marks_deleted }))
}

fn handle_marks_enter(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let marks = marks_map(&req.params, "marks")?;
    to_value(&assessment::enter_marks(conn, &state.policy, &caller, &exam_id, &marks)?)
}

fn handle_marks_sheet(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let (exam, rows) = assessment::mark_sheet(conn, &caller, &exam_id)?;
    Ok(json!({ "exam": exam, "rows": rows }))
}

fn handle_my_results(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let subjects = assessment::my_results(conn, &caller)?;
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "exams.create" => handle_exams_create(state, req),
        "exams.list" => handle_exams_list(state, req),
        "exams.delete" => handle_exams_delete(state, req),
        "marks.enter" => handle_marks_enter(state, req),
        "marks.sheet" => handle_marks_sheet(state, req),
        "marks.myResults" => handle_my_results(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
