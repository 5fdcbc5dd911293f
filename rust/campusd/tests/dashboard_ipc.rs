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
    teacher: String,
    teacher_staff_id: String,
    department_id: String,
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
        teacher,
        teacher_staff_id,
        department_id,
        subject_id,
        students,
    }
}

// 2024-05-01 is a Wednesday, day 2 counting from Monday.
const AS_OF: &str = "2024-05-01T09:00:00Z";

#[test]
fn each_role_gets_its_own_panel() {
    let workspace = temp_dir("campusd-dashboard");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    let campus = seed_campus(&mut sc, 2);
    let m = campus.management.clone();
    let (s1_user, _) = campus.students[0].clone();

    let structure = sc.request_ok(
        "fees.createStructure",
        json!({
            "actor": m,
            "academicYear": "2024-25",
            "year": 1,
            "departmentId": campus.department_id,
            "amount": 1000.0,
            "dueDate": "2024-07-31"
        }),
    );
    sc.request_ok(
        "fees.assign",
        json!({ "actor": m, "feeStructureId": str_at(&structure, "/id") }),
    );
    sc.request_ok(
        "complaints.submit",
        json!({
            "actor": s1_user,
            "complaintType": "utility",
            "subject": "Fan",
            "description": "The ceiling fan in room 4 is broken."
        }),
    );
    sc.request_ok(
        "notices.create",
        json!({ "actor": m, "title": "Sports day", "content": "Friday.", "asOf": AS_OF }),
    );
    for day in [2, 3] {
        sc.request_ok(
            "timetable.createEntry",
            json!({
                "actor": campus.teacher,
                "departmentId": campus.department_id,
                "year": 1,
                "section": "A",
                "dayOfWeek": day,
                "period": 2,
                "subjectId": campus.subject_id,
                "staffId": campus.teacher_staff_id
            }),
        );
    }

    let student = sc.request_ok("dashboard.summary", json!({ "actor": s1_user, "asOf": AS_OF }));
    assert_eq!(student["role"], json!("student"));
    assert_eq!(student.pointer("/student/pendingFees"), Some(&json!(1)));
    assert_eq!(student.pointer("/student/pendingFeeBalance"), Some(&json!(1000.0)));
    assert_eq!(student.pointer("/student/openComplaints"), Some(&json!(1)));
    assert_eq!(student.pointer("/student/borrowedBooks"), Some(&json!(0)));
    assert_eq!(student["recentNotices"].as_array().map(|a| a.len()), Some(1));
    assert!(student.get("management").is_none());
    let unread = sc.request_ok("notifications.unreadCount", json!({ "actor": s1_user }));
    assert_eq!(student["unreadNotifications"], unread["count"]);

    let staff = sc.request_ok("dashboard.summary", json!({ "actor": campus.teacher, "asOf": AS_OF }));
    assert_eq!(staff["role"], json!("staff"));
    let today = staff.pointer("/staff/todayClasses").and_then(|v| v.as_array()).expect("classes");
    assert_eq!(today.len(), 1);
    assert_eq!(today[0]["dayName"], json!("Wednesday"));
    assert_eq!(staff.pointer("/staff/departmentStudents"), Some(&json!(2)));

    let mgmt = sc.request_ok("dashboard.summary", json!({ "actor": m, "asOf": AS_OF }));
    assert_eq!(mgmt.pointer("/management/totalStudents"), Some(&json!(2)));
    assert_eq!(mgmt.pointer("/management/totalStaff"), Some(&json!(3)));
    assert_eq!(mgmt.pointer("/management/openComplaints"), Some(&json!(1)));
    assert_eq!(mgmt.pointer("/management/pendingFeesTotal"), Some(&json!(2000.0)));
    assert_eq!(
        mgmt.pointer("/management/recentComplaints").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    assert_eq!(sc.request_err("dashboard.summary", json!({})), "unknown_actor");
    sc.shutdown();
}
