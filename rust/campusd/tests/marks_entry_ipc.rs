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
    teacher: String,
    other_teacher: String,
    subject_id: String,
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
    let teacher_row = staff(sc, "teacher", "staff", "E-101");
    let teacher = str_at(&teacher_row, "/id");
    let teacher_staff_id = str_at(&teacher_row, "/profileId");
    let other_teacher = str_at(&staff(sc, "other", "staff", "E-102"), "/id");

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
        teacher,
        other_teacher,
        subject_id,
        students,
    }
}

#[test]
fn marks_are_graded_per_entry_and_owned_by_the_exam_creator() {
    let workspace = temp_dir("campusd-marks");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    let campus = seed_campus(&mut sc, 4);
    let ids: Vec<String> = campus.students.iter().map(|(_, p)| p.clone()).collect();

    assert_eq!(
        sc.request_err(
            "exams.create",
            json!({
                "actor": campus.other_teacher,
                "name": "Quiz",
                "examType": "internal",
                "subjectId": campus.subject_id,
                "maxMarks": 50,
                "year": 1,
                "section": "A"
            })
        ),
        "forbidden"
    );

    let exam = sc.request_ok(
        "exams.create",
        json!({
            "actor": campus.teacher,
            "name": "Midterm",
            "examType": "internal",
            "subjectId": campus.subject_id,
            "maxMarks": 50,
            "date": "2024-03-10",
            "year": 1,
            "section": "A"
        }),
    );
    let exam_id = str_at(&exam, "/id");

    let report = sc.request_ok(
        "marks.enter",
        json!({
            "actor": campus.teacher,
            "examId": exam_id,
            "marks": {
                ids[0].clone(): 46,
                ids[1].clone(): "30",
                ids[2].clone(): null,
                ids[3].clone(): 51,
                "stranger": 10
            }
        }),
    );
    let grades: Vec<_> = report["entered"]
        .as_array()
        .map(|rows| rows.iter().map(|r| r["grade"].clone()).collect())
        .unwrap_or_default();
    assert_eq!(grades, vec![json!("O"), json!("B+"), json!("AB")]);
    assert_eq!(report["notificationsCreated"], json!(3));
    let rejected: Vec<_> = report["rejected"]
        .as_array()
        .map(|rows| rows.iter().map(|r| r["studentId"].clone()).collect())
        .unwrap_or_default();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.contains(&json!("stranger")));
    assert!(rejected.contains(&json!(ids[3])));

    // Blank leaves the stored mark alone; a correction overwrites it.
    let fixed = sc.request_ok(
        "marks.enter",
        json!({
            "actor": campus.teacher,
            "examId": exam_id,
            "marks": { ids[0].clone(): "", ids[1].clone(): 19.5 }
        }),
    );
    assert_eq!(fixed.pointer("/entered/0/grade"), Some(&json!("F")));
    let sheet = sc.request_ok("marks.sheet", json!({ "actor": campus.teacher, "examId": exam_id }));
    assert_eq!(sheet.pointer("/rows/0/marksObtained"), Some(&json!(46.0)));
    assert_eq!(sheet.pointer("/rows/1/grade"), Some(&json!("F")));
    assert_eq!(sheet.pointer("/rows/3/grade"), Some(&json!(null)));

    assert_eq!(
        sc.request_err(
            "marks.enter",
            json!({ "actor": campus.other_teacher, "examId": exam_id, "marks": {} })
        ),
        "forbidden"
    );

    let results = sc.request_ok("marks.myResults", json!({ "actor": campus.students[0].0 }));
    assert_eq!(results.pointer("/subjects/0/subjectName"), Some(&json!("Programming")));
    assert_eq!(results.pointer("/subjects/0/results/0/grade"), Some(&json!("O")));

    let deleted = sc.request_ok("exams.delete", json!({ "actor": campus.teacher, "examId": exam_id }));
    assert_eq!(deleted["marksDeleted"], json!(3));
    sc.shutdown();
}
