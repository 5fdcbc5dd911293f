use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "campus.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Identity
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            hod_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            department_id TEXT NOT NULL,
            section TEXT NOT NULL,
            phone TEXT,
            admission_date TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_roster ON students(department_id, year, section)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            employee_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department_id TEXT NOT NULL,
            designation TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS management(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            employee_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            designation TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Catalog
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            credits INTEGER NOT NULL DEFAULT 3,
            is_lab INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff_assignments(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            department_id TEXT NOT NULL,
            assigned_date TEXT NOT NULL,
            FOREIGN KEY(staff_id) REFERENCES staff(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(staff_id, subject_id, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_assignments_subject ON staff_assignments(subject_id)",
        [],
    )?;

    // Attendance ledger
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            staff_id TEXT NOT NULL,
            date TEXT NOT NULL,
            period INTEGER NOT NULL,
            year INTEGER NOT NULL,
            section TEXT NOT NULL,
            department_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(staff_id) REFERENCES staff(id),
            UNIQUE(subject_id, date, period, section, department_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_summary(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            total_classes INTEGER NOT NULL,
            attended INTEGER NOT NULL,
            percentage REAL NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    // Assessment ledger
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            max_marks REAL NOT NULL,
            date TEXT,
            year INTEGER NOT NULL,
            section TEXT NOT NULL,
            department_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(created_by) REFERENCES staff(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            marks_obtained REAL,
            grade TEXT NOT NULL,
            remarks TEXT,
            entered_at TEXT NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(exam_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    // Fee ledger
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            academic_year TEXT NOT NULL,
            year INTEGER NOT NULL,
            department_id TEXT,
            fee_type TEXT,
            amount REAL NOT NULL,
            due_date TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_structure_id TEXT NOT NULL,
            amount_due REAL NOT NULL,
            amount_paid REAL NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            payment_date TEXT,
            transaction_id TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_structure_id) REFERENCES fee_structures(id),
            UNIQUE(student_id, fee_structure_id)
        )",
        [],
    )?;

    // Library ledger
    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id TEXT PRIMARY KEY,
            isbn TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            publisher TEXT,
            publication_year INTEGER,
            category TEXT,
            total_copies INTEGER NOT NULL,
            available_copies INTEGER NOT NULL,
            location TEXT,
            added_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_issues(
            id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            return_date TEXT,
            status TEXT NOT NULL,
            fine_amount REAL NOT NULL DEFAULT 0,
            remarks TEXT,
            FOREIGN KEY(book_id) REFERENCES books(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_issues_student ON book_issues(student_id)",
        [],
    )?;

    // Notification sink
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            reference_type TEXT,
            reference_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read)",
        [],
    )?;

    // Lifecycle records
    conn.execute(
        "CREATE TABLE IF NOT EXISTS complaints(
            id TEXT PRIMARY KEY,
            complaint_type TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority TEXT NOT NULL DEFAULT 'normal',
            submitted_by TEXT NOT NULL,
            assigned_to TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT,
            FOREIGN KEY(submitted_by) REFERENCES students(id),
            FOREIGN KEY(assigned_to) REFERENCES staff(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS complaint_responses(
            id TEXT PRIMARY KEY,
            complaint_id TEXT NOT NULL,
            responder_id TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(complaint_id) REFERENCES complaints(id),
            FOREIGN KEY(responder_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback(
            id TEXT PRIMARY KEY,
            feedback_type TEXT NOT NULL,
            content TEXT NOT NULL,
            rating INTEGER NOT NULL,
            is_anonymous INTEGER NOT NULL DEFAULT 0,
            submitted_by TEXT NOT NULL,
            target_staff_id TEXT,
            subject_id TEXT,
            status TEXT NOT NULL DEFAULT 'submitted',
            created_at TEXT NOT NULL,
            FOREIGN KEY(submitted_by) REFERENCES students(id),
            FOREIGN KEY(target_staff_id) REFERENCES staff(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notices(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'normal',
            target_audience TEXT NOT NULL DEFAULT 'all',
            department_id TEXT,
            posted_by TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            publish_date TEXT NOT NULL,
            expiry_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(posted_by) REFERENCES management(id)
        )",
        [],
    )?;

    // Timetable: one active entry per slot; removed entries are kept inactive.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable(
            id TEXT PRIMARY KEY,
            department_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            section TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            period INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            staff_id TEXT NOT NULL,
            room TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(staff_id) REFERENCES staff(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_timetable_active_slot
         ON timetable(department_id, year, section, day_of_week, period)
         WHERE is_active = 1",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
