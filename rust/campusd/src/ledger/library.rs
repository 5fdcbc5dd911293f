//! Book catalog and loans. Overdue status and fines are derived from the
//! clock on every read; rows move to `overdue` only through `sweep_overdue`,
//! and a returned loan keeps the fine it carried on the way back.

use super::{new_id, now_ts};
use crate::auth::Caller;
use crate::calc::{self, LoanState, LoanStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct NewBook {
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i64>,
    pub category: Option<String>,
    pub total_copies: i64,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i64>,
    pub category: Option<String>,
    pub total_copies: i64,
    pub available_copies: i64,
    pub location: Option<String>,
}

const BOOK_SELECT: &str = "SELECT id, isbn, title, author, publisher, publication_year, category,
        total_copies, available_copies, location
     FROM books";

fn book_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: r.get(0)?,
        isbn: r.get(1)?,
        title: r.get(2)?,
        author: r.get(3)?,
        publisher: r.get(4)?,
        publication_year: r.get(5)?,
        category: r.get(6)?,
        total_copies: r.get(7)?,
        available_copies: r.get(8)?,
        location: r.get(9)?,
    })
}

pub fn load_book(conn: &Connection, id: &str) -> LedgerResult<Book> {
    let sql = format!("{} WHERE id = ?", BOOK_SELECT);
    conn.query_row(&sql, [id], book_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "book" })
}

pub fn add_book(conn: &Connection, caller: &Caller, input: &NewBook) -> LedgerResult<Book> {
    caller.require_management("add books")?;
    let isbn = input.isbn.trim();
    if isbn.is_empty() || input.title.trim().is_empty() || input.author.trim().is_empty() {
        return Err(LedgerError::bad_params("isbn, title and author are required"));
    }
    if input.total_copies < 1 {
        return Err(LedgerError::bad_params("totalCopies must be at least 1"));
    }
    let existing: Option<String> = conn
        .query_row("SELECT id FROM books WHERE isbn = ?", [isbn], |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        tracing::warn!(isbn, book_id = %id, "book with this ISBN already exists");
        return Err(LedgerError::conflict_with(
            "a book with this ISBN already exists",
            id,
        ));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO books(id, isbn, title, author, publisher, publication_year, category, total_copies, available_copies, location, added_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            isbn,
            input.title.trim(),
            input.author.trim(),
            &input.publisher,
            input.publication_year,
            &input.category,
            input.total_copies,
            input.total_copies,
            &input.location,
            now_ts(),
        ),
    )?;
    tracing::info!(book_id = %id, isbn, copies = input.total_copies, "book added");
    load_book(conn, &id)
}

/// Case-insensitive substring match on title, author or ISBN. An empty
/// query matches nothing.
pub fn search(conn: &Connection, query: &str) -> LedgerResult<Vec<Book>> {
    let q = query.trim();
    if q.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{}%", q.to_lowercase());
    let sql = format!(
        "{} WHERE lower(title) LIKE ?1 OR lower(author) LIKE ?1 OR lower(isbn) LIKE ?1 ORDER BY title",
        BOOK_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([pattern], book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn available(conn: &Connection) -> LedgerResult<Vec<Book>> {
    let sql = format!("{} WHERE available_copies > 0 ORDER BY title", BOOK_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Who the book goes to; the front end may know either handle.
#[derive(Debug, Clone)]
pub enum Borrower {
    StudentId(String),
    RollNumber(String),
}

fn resolve_borrower(conn: &Connection, borrower: &Borrower) -> LedgerResult<String> {
    let found: Option<String> = match borrower {
        Borrower::StudentId(id) => conn
            .query_row("SELECT id FROM students WHERE id = ?", [id], |r| r.get(0))
            .optional()?,
        Borrower::RollNumber(roll) => conn
            .query_row(
                "SELECT id FROM students WHERE roll_number = ?",
                [roll.trim()],
                |r| r.get(0),
            )
            .optional()?,
    };
    found.ok_or(LedgerError::NotFound { entity: "student" })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub student_id: String,
    pub issue_date: String,
    pub due_date: String,
    pub return_date: Option<String>,
    pub stored_status: String,
    #[serde(flatten)]
    pub state: LoanState,
}

struct LoanRow {
    id: String,
    book_id: String,
    title: String,
    author: String,
    student_id: String,
    issue_date: String,
    due_date: String,
    return_date: Option<String>,
    status: String,
    fine_amount: f64,
}

const LOAN_SELECT: &str = "SELECT i.id, i.book_id, b.title, b.author, i.student_id, i.issue_date, i.due_date,
        i.return_date, i.status, i.fine_amount
     FROM book_issues i
     JOIN books b ON b.id = i.book_id";

fn loan_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LoanRow> {
    Ok(LoanRow {
        id: r.get(0)?,
        book_id: r.get(1)?,
        title: r.get(2)?,
        author: r.get(3)?,
        student_id: r.get(4)?,
        issue_date: r.get(5)?,
        due_date: r.get(6)?,
        return_date: r.get(7)?,
        status: r.get(8)?,
        fine_amount: r.get(9)?,
    })
}

impl LoanRow {
    fn parsed(&self) -> LedgerResult<(DateTime<Utc>, LoanStatus)> {
        let due = calc::parse_ts(&self.due_date).ok_or_else(|| {
            LedgerError::Corrupt(format!("loan {} has an unreadable due date", self.id))
        })?;
        let status = LoanStatus::parse(&self.status).ok_or_else(|| {
            LedgerError::Corrupt(format!("loan {} has unknown status {}", self.id, self.status))
        })?;
        Ok((due, status))
    }

    fn into_loan(self, policy: &Policy, now: DateTime<Utc>) -> LedgerResult<Loan> {
        let (due, status) = self.parsed()?;
        let state = calc::loan_state(policy, now, due, status, self.fine_amount);
        Ok(Loan {
            id: self.id,
            book_id: self.book_id,
            title: self.title,
            author: self.author,
            student_id: self.student_id,
            issue_date: self.issue_date,
            due_date: self.due_date,
            return_date: self.return_date,
            stored_status: self.status,
            state,
        })
    }
}

fn load_loan_row(conn: &Connection, issue_id: &str) -> LedgerResult<LoanRow> {
    let sql = format!("{} WHERE i.id = ?", LOAN_SELECT);
    conn.query_row(&sql, [issue_id], loan_row)
        .optional()?
        .ok_or(LedgerError::NotFound { entity: "book issue" })
}

/// Lends one copy. Refused without touching the counter when no copy is on
/// the shelf or the student already holds an unreturned copy.
pub fn issue(
    conn: &Connection,
    policy: &Policy,
    caller: &Caller,
    book_id: &str,
    borrower: &Borrower,
    now: DateTime<Utc>,
) -> LedgerResult<Loan> {
    caller.require_management("issue books")?;
    let book = load_book(conn, book_id)?;
    let student_id = resolve_borrower(conn, borrower)?;

    if book.available_copies <= 0 {
        tracing::warn!(book_id, "issue refused: no copies available");
        return Err(LedgerError::conflict("no copies of this book are available"));
    }
    let held: Option<String> = conn
        .query_row(
            "SELECT id FROM book_issues WHERE book_id = ? AND student_id = ? AND status != 'returned'",
            (book_id, &student_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = held {
        tracing::warn!(book_id, student_id = %student_id, "issue refused: already held");
        return Err(LedgerError::conflict_with(
            "student already has this book issued",
            existing,
        ));
    }

    let id = new_id();
    let due = calc::loan_due_date(policy, now);
    let tx = conn.unchecked_transaction()?;
    let moved = tx.execute(
        "UPDATE books SET available_copies = available_copies - 1 WHERE id = ? AND available_copies > 0",
        [book_id],
    )?;
    if moved != 1 {
        return Err(LedgerError::conflict("no copies of this book are available"));
    }
    tx.execute(
        "INSERT INTO book_issues(id, book_id, student_id, issue_date, due_date, status, fine_amount)
         VALUES(?, ?, ?, ?, ?, 'issued', 0)",
        (
            &id,
            book_id,
            &student_id,
            calc::format_ts(now),
            calc::format_ts(due),
        ),
    )?;
    tx.commit()?;
    tracing::info!(issue_id = %id, book_id, student_id = %student_id, "book issued");
    load_loan_row(conn, &id)?.into_loan(policy, now)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnOutcome {
    pub already_returned: bool,
    pub loan: Loan,
}

/// Closes a loan and puts the copy back. Returning twice changes nothing.
pub fn return_book(
    conn: &Connection,
    policy: &Policy,
    caller: &Caller,
    issue_id: &str,
    now: DateTime<Utc>,
) -> LedgerResult<ReturnOutcome> {
    caller.require_management("return books")?;
    let row = load_loan_row(conn, issue_id)?;
    let (due, status) = row.parsed()?;
    if status == LoanStatus::Returned {
        tracing::warn!(issue_id, "book already returned");
        return Ok(ReturnOutcome {
            already_returned: true,
            loan: row.into_loan(policy, now)?,
        });
    }

    let settled = calc::loan_state(policy, now, due, status, row.fine_amount);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE book_issues SET status = 'returned', return_date = ?, fine_amount = ? WHERE id = ?",
        (calc::format_ts(now), settled.fine, issue_id),
    )?;
    tx.execute(
        "UPDATE books SET available_copies = available_copies + 1 WHERE id = ?",
        [&row.book_id],
    )?;
    tx.commit()?;
    tracing::info!(issue_id, fine = settled.fine, "book returned");
    Ok(ReturnOutcome {
        already_returned: false,
        loan: load_loan_row(conn, issue_id)?.into_loan(policy, now)?,
    })
}

/// The calling student's loans, newest first, with overdue and fine as of
/// `now`. Nothing is written.
pub fn my_books(conn: &Connection, policy: &Policy, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<Vec<Loan>> {
    let student_id = caller.student_id()?;
    let sql = format!("{} WHERE i.student_id = ? ORDER BY i.issue_date DESC, i.rowid DESC", LOAN_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], loan_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| r.into_loan(policy, now)).collect()
}

/// Every loan for the library desk, open loans first.
pub fn all_loans(conn: &Connection, policy: &Policy, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<Vec<Loan>> {
    caller.require_management("view all loans")?;
    let sql = format!(
        "{} ORDER BY (i.status = 'returned'), i.due_date, i.rowid",
        LOAN_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], loan_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| r.into_loan(policy, now)).collect()
}

/// Persists `overdue` and the current fine on every unreturned loan past
/// its due date. Returns how many rows changed.
pub fn sweep_overdue(conn: &Connection, policy: &Policy, caller: &Caller, now: DateTime<Utc>) -> LedgerResult<usize> {
    caller.require_management("sweep overdue loans")?;
    let sql = format!("{} WHERE i.status != 'returned'", LOAN_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let open = stmt
        .query_map([], loan_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    for row in open {
        let (due, status) = row.parsed()?;
        let state = calc::loan_state(policy, now, due, status, row.fine_amount);
        if !state.overdue {
            continue;
        }
        if status == LoanStatus::Overdue && state.fine == row.fine_amount {
            continue;
        }
        tx.execute(
            "UPDATE book_issues SET status = 'overdue', fine_amount = ? WHERE id = ?",
            (state.fine, &row.id),
        )?;
        changed += 1;
    }
    tx.commit()?;
    tracing::info!(changed, "overdue sweep finished");
    Ok(changed)
}
