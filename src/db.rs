use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::path::Path;

/// Storage format for timestamps. Calendar days are stored as YYYY-MM-DD.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

/// Server-local wall clock in storage format.
pub fn now_stamp() -> String {
    format_timestamp(chrono::Local::now().naive_local())
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            weekdays TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            lesson_start_time TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // One transfer per (group, original date). transfers.set refuses
    // duplicates; the primary key backs that invariant up.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_transfers(
            group_id TEXT NOT NULL,
            original_date TEXT NOT NULL,
            real_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(group_id, original_date),
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            phone TEXT,
            birth_date TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Append-only condition log. Rows are never updated or deleted; the
    // latest row per (group, student) is the current condition.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS membership_history(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            condition TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_membership_group ON membership_history(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_membership_group_student
         ON membership_history(group_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attend_date TEXT NOT NULL,
            status INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(group_id, student_id, attend_date),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_group_date
         ON attendance(group_id, attend_date)",
        [],
    )?;

    Ok(conn)
}
