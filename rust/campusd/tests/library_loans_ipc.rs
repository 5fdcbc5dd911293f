use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .env_remove("CAMPUSD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut reply = String::new();
        self.reader.read_line(&mut reply).expect("read response line");
        assert!(!reply.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(reply.trim()).expect("parse response json")
    }

    fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| serde_json::json!({}))
    }

    /// Expects a failure and returns its error code.
    fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    fn select_workspace(&mut self, path: &Path) {
        self.request_ok("workspace.select", serde_json::json!({ "path": path.to_string_lossy() }));
    }

    fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn str_at(v: &serde_json::Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
        .to_string()
}

/// One department with a management user, a HOD, two teachers, one subject
/// assigned to the first teacher, and `n_students` students in year 1
/// section A.
struct Campus {
    management: String,
    /// `(user id, student profile id)` in roll order.
    students: Vec<(String, String)>,
}

fn seed_campus(sc: &mut Sidecar, n_students: usize) -> Campus {
    let mgmt = sc.request_ok(
        "users.create",
        serde_json::json!({
            "username": "admin",
            "email": "admin@campus.test",
            "role": "management",
            "name": "Registrar",
            "employeeId": "M-001"
        }),
    );
    let management = str_at(&mgmt, "/id");

    let dept = sc.request_ok(
        "departments.create",
        serde_json::json!({ "actor": management, "code": "cse", "name": "Computer Science" }),
    );
    let department_id = str_at(&dept, "/id");

    let staff = |sc: &mut Sidecar, username: &str, role: &str, emp: &str| {
        sc.request_ok(
            "users.create",
            serde_json::json!({
                "actor": management,
                "username": username,
                "email": format!("{}@campus.test", username),
                "role": role,
                "name": username.to_uppercase(),
                "departmentId": department_id,
                "employeeId": emp
            }),
        )
    };
    let hod = str_at(&staff(sc, "hod", "hod", "E-100"), "/id");
    let teacher_staff_id = str_at(&staff(sc, "teacher", "staff", "E-101"), "/profileId");
    staff(sc, "other", "staff", "E-102");

    let subject = sc.request_ok(
        "subjects.create",
        serde_json::json!({
            "actor": hod,
            "code": "CS101",
            "name": "Programming",
            "departmentId": department_id,
            "year": 1
        }),
    );
    let subject_id = str_at(&subject, "/id");
    sc.request_ok(
        "assignments.create",
        serde_json::json!({ "actor": hod, "staffId": teacher_staff_id, "subjectId": subject_id, "year": 1 }),
    );

    let mut students = Vec::new();
    for i in 1..=n_students {
        let row = sc.request_ok(
            "users.create",
            serde_json::json!({
                "actor": management,
                "username": format!("student{}", i),
                "email": format!("student{}@campus.test", i),
                "role": "student",
                "name": format!("Student {}", i),
                "departmentId": department_id,
                "rollNumber": format!("CSE{:03}", i),
                "year": 1,
                "section": "A"
            }),
        );
        students.push((str_at(&row, "/id"), str_at(&row, "/profileId")));
    }

    Campus {
        management,
        students,
    }
}

#[test]
fn issue_return_and_overdue_sweep() {
    let workspace = temp_dir("campusd-library");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    let campus = seed_campus(&mut sc, 2);
    let m = campus.management.clone();
    let (s1_user, s1) = campus.students[0].clone();

    let book = sc.request_ok(
        "library.addBook",
        json!({
            "actor": m,
            "isbn": "978-1718503106",
            "title": "The Rust Programming Language",
            "author": "Klabnik",
            "totalCopies": 1
        }),
    );
    let book_id = str_at(&book, "/id");
    let dup = sc.request(
        "library.addBook",
        json!({ "actor": m, "isbn": "978-1718503106", "title": "Copy", "author": "X" }),
    );
    assert_eq!(dup.pointer("/error/code"), Some(&json!("conflict")));
    assert_eq!(dup.pointer("/error/details/existingId"), Some(&json!(book_id)));

    let found = sc.request_ok("library.search", json!({ "actor": s1_user, "q": "rust" }));
    assert_eq!(found["books"].as_array().map(|b| b.len()), Some(1));

    let loan = sc.request_ok(
        "library.issue",
        json!({ "actor": m, "bookId": book_id, "studentId": s1, "asOf": "2024-03-01T10:00:00Z" }),
    );
    let issue_id = str_at(&loan, "/id");
    assert_eq!(loan["dueDate"], json!("2024-03-15T10:00:00Z"));

    // Last copy is out.
    assert_eq!(
        sc.request_err(
            "library.issue",
            json!({ "actor": m, "bookId": book_id, "rollNumber": "CSE002" })
        ),
        "conflict"
    );
    let available = sc.request_ok("library.available", json!({ "actor": s1_user }));
    assert_eq!(available["books"], json!([]));

    // Reading never writes: overdue is derived, the stored row stays issued.
    let mine = sc.request_ok(
        "library.myBooks",
        json!({ "actor": s1_user, "asOf": "2024-03-18T12:00:00Z" }),
    );
    assert_eq!(mine.pointer("/loans/0/status"), Some(&json!("overdue")));
    assert_eq!(mine.pointer("/loans/0/daysOverdue"), Some(&json!(3)));
    assert_eq!(mine.pointer("/loans/0/fine"), Some(&json!(15.0)));
    assert_eq!(mine.pointer("/loans/0/storedStatus"), Some(&json!("issued")));

    let swept = sc.request_ok(
        "library.sweepOverdue",
        json!({ "actor": m, "asOf": "2024-03-18T12:00:00Z" }),
    );
    assert_eq!(swept["updated"], json!(1));
    let conn = Connection::open(workspace.join("campus.sqlite3")).expect("open db");
    let (status, fine): (String, f64) = conn
        .query_row(
            "SELECT status, fine_amount FROM book_issues WHERE id = ?",
            [&issue_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("loan row");
    assert_eq!(status, "overdue");
    assert_eq!(fine, 15.0);

    let returned = sc.request_ok(
        "library.return",
        json!({ "actor": m, "issueId": issue_id, "asOf": "2024-03-20T09:00:00Z" }),
    );
    assert_eq!(returned["alreadyReturned"], json!(false));
    assert_eq!(returned.pointer("/loan/status"), Some(&json!("returned")));
    assert_eq!(returned.pointer("/loan/fine"), Some(&json!(20.0)));

    let again = sc.request_ok("library.return", json!({ "actor": m, "issueId": issue_id }));
    assert_eq!(again["alreadyReturned"], json!(true));
    let available = sc.request_ok("library.available", json!({ "actor": s1_user }));
    assert_eq!(available.pointer("/books/0/availableCopies"), Some(&json!(1)));

    assert_eq!(
        sc.request_err("library.issue", json!({ "actor": s1_user, "bookId": book_id, "studentId": s1 })),
        "forbidden"
    );
    sc.shutdown();
}
