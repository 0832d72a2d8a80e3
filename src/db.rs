use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    migrate(&conn)?;
    Ok(conn)
}

/// Creates every table the engine needs. Idempotent; existing data is preserved.
pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            dept_id TEXT PRIMARY KEY,
            dept_name TEXT NOT NULL,
            hod_name TEXT,
            established_year INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            section_id INTEGER PRIMARY KEY AUTOINCREMENT,
            section_name TEXT NOT NULL,
            department TEXT NOT NULL,
            semester INTEGER NOT NULL,
            batch INTEGER NOT NULL,
            class_teacher TEXT,
            room_number TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(department) REFERENCES departments(dept_id),
            UNIQUE(section_name, department, semester, batch)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_department ON sections(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            subject_code TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL,
            credits INTEGER NOT NULL CHECK(credits BETWEEN 1 AND 40),
            semester INTEGER NOT NULL,
            department TEXT NOT NULL,
            subject_type TEXT NOT NULL CHECK(subject_type IN ('Theory', 'Practical')),
            max_marks INTEGER NOT NULL DEFAULT 100,
            min_pass_marks INTEGER NOT NULL DEFAULT 40,
            teaching_hours INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(department) REFERENCES departments(dept_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_department ON subjects(department, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            batch INTEGER NOT NULL,
            current_semester INTEGER NOT NULL DEFAULT 1,
            section TEXT,
            email TEXT,
            phone TEXT,
            address TEXT,
            blood_group TEXT,
            admission_date TEXT,
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(department) REFERENCES departments(dept_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS theory_grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT,
            internal1_marks REAL NOT NULL DEFAULT 0,
            internal2_marks REAL NOT NULL DEFAULT 0,
            presentation_marks REAL NOT NULL DEFAULT 0,
            assignment1_marks REAL NOT NULL DEFAULT 0,
            assignment2_marks REAL NOT NULL DEFAULT 0,
            external_marks REAL NOT NULL DEFAULT 0,
            internal_total REAL NOT NULL DEFAULT 0,
            total_marks REAL NOT NULL DEFAULT 0,
            grade TEXT NOT NULL,
            grade_point REAL NOT NULL DEFAULT 0,
            result_status TEXT NOT NULL,
            back_paper INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(subject_code) REFERENCES subjects(subject_code),
            UNIQUE(student_id, subject_code, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_theory_grades_student ON theory_grades(student_id, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS practical_grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT,
            lab_copies_marks REAL NOT NULL DEFAULT 0,
            viva_marks REAL NOT NULL DEFAULT 0,
            practical_exam_marks REAL NOT NULL DEFAULT 0,
            total_marks REAL NOT NULL DEFAULT 0,
            grade TEXT NOT NULL,
            grade_point REAL NOT NULL DEFAULT 0,
            result_status TEXT NOT NULL,
            back_paper INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(subject_code) REFERENCES subjects(subject_code),
            UNIQUE(student_id, subject_code, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_practical_grades_student ON practical_grades(student_id, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admin_users(
            username TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            recovery_hash TEXT,
            recovery_salt TEXT,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            is_locked INTEGER NOT NULL DEFAULT 0,
            locked_at TEXT,
            last_login TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS security_events(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_kind TEXT NOT NULL,
            description TEXT NOT NULL,
            username TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_security_events_kind_time ON security_events(event_kind, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_security_events_time ON security_events(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid json", key))?,
        )),
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

pub fn count_rows(conn: &Connection, sql: &str, key: &str) -> anyhow::Result<i64> {
    Ok(conn.query_row(sql, [key], |r| r.get(0))?)
}
