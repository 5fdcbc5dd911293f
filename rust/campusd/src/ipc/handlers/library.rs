use crate::ipc::helpers::{
    as_of, get_optional_i64, get_optional_str, get_required_str, reply, session, to_value,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::library::{self, Borrower, NewBook};
use serde_json::{json, Value};

fn handle_add_book(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let p = &req.params;
    let input = NewBook {
        isbn: get_required_str(p, "isbn")?,
        title: get_required_str(p, "title")?,
        author: get_required_str(p, "author")?,
        publisher: get_optional_str(p, "publisher")?,
        publication_year: get_optional_i64(p, "publicationYear")?,
        category: get_optional_str(p, "category")?,
        total_copies: get_optional_i64(p, "totalCopies")?.unwrap_or(1),
        location: get_optional_str(p, "location")?,
    };
    to_value(&library::add_book(conn, &caller, &input)?)
}

fn handle_search(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, _caller) = session(state, req)?;
    let q = get_optional_str(&req.params, "q")?.unwrap_or_default();
    let books = library::search(conn, &q)?;
    Ok(json!({ "books": books }))
}

fn handle_available(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, _caller) = session(state, req)?;
    let books = library::available(conn)?;
    Ok(json!({ "books": books }))
}

fn borrower(params: &Value) -> Result<Borrower, HandlerErr> {
    if let Some(id) = get_optional_str(params, "studentId")? {
        return Ok(Borrower::StudentId(id));
    }
    if let Some(roll) = get_optional_str(params, "rollNumber")? {
        return Ok(Borrower::RollNumber(roll));
    }
    Err(HandlerErr::bad_params("missing studentId or rollNumber"))
}

fn handle_issue(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let book_id = get_required_str(&req.params, "bookId")?;
    let who = borrower(&req.params)?;
    let now = as_of(&req.params)?;
    to_value(&library::issue(conn, &state.policy, &caller, &book_id, &who, now)?)
}

fn handle_return(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let issue_id = get_required_str(&req.params, "issueId")?;
    let now = as_of(&req.params)?;
    to_value(&library::return_book(conn, &state.policy, &caller, &issue_id, now)?)
}

fn handle_my_books(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let now = as_of(&req.params)?;
    let loans = library::my_books(conn, &state.policy, &caller, now)?;
    Ok(json!({ "loans": loans }))
}

fn handle_loans(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let now = as_of(&req.params)?;
    let loans = library::all_loans(conn, &state.policy, &caller, now)?;
    Ok(json!({ "loans": loans }))
}

fn handle_sweep_overdue(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, caller) = session(state, req)?;
    let now = as_of(&req.params)?;
    let updated = library::sweep_overdue(conn, &state.policy, &caller, now)?;
    Ok(json!({ "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "library.addBook" => handle_add_book(state, req),
        "library.search" => handle_search(state, req),
        "library.available" => handle_available(state, req),
        "library.issue" => handle_issue(state, req),
        "library.return" => handle_return(state, req),
        "library.myBooks" => handle_my_books(state, req),
        "library.loans" => handle_loans(state, req),
        "library.sweepOverdue" => handle_sweep_overdue(state, req),
        _ => return None,
    };
    Some(reply(req, result))
}
