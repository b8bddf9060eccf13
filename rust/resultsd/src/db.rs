use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("results.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table the sidecar uses. Safe to run on an existing workspace.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT,
            photo_ref TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_sets(
            class_id TEXT NOT NULL,
            term TEXT NOT NULL,
            session TEXT NOT NULL,
            result_type TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_by TEXT,
            submitted_date TEXT,
            reviewed_by TEXT,
            reviewed_date TEXT,
            rejection_reason TEXT,
            revision INTEGER NOT NULL,
            updated_at TEXT,
            snapshot_json TEXT,
            PRIMARY KEY(class_id, term, session, result_type),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_sets_revision ON result_sets(revision)",
        [],
    )?;
    ensure_result_sets_snapshot(conn)?;

    // Only raw components are stored; totals and grades are always derived.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_scores(
            id INTEGER PRIMARY KEY,
            class_id TEXT NOT NULL,
            term TEXT NOT NULL,
            session TEXT NOT NULL,
            result_type TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            periodic_test REAL,
            mid_term_test REAL,
            quiz_practical REAL,
            class_participation REAL,
            exam_score REAL,
            updated_at TEXT,
            FOREIGN KEY(class_id, term, session, result_type)
              REFERENCES result_sets(class_id, term, session, result_type),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, term, session, result_type, student_id, subject_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_scores_set
           ON subject_scores(class_id, term, session, result_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_scores_student ON subject_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_comments(
            class_id TEXT NOT NULL,
            term TEXT NOT NULL,
            session TEXT NOT NULL,
            result_type TEXT NOT NULL,
            student_id TEXT NOT NULL,
            teacher_comment TEXT,
            principal_comment TEXT,
            PRIMARY KEY(class_id, term, session, result_type, student_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            subject TEXT NOT NULL,
            taken_by TEXT,
            supersedes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(supersedes) REFERENCES attendance_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_class_date
           ON attendance_records(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_entries(
            record_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(record_id, student_id),
            FOREIGN KEY(record_id) REFERENCES attendance_records(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS discipline_cases(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            reported_by TEXT NOT NULL,
            reported_date TEXT NOT NULL,
            status TEXT NOT NULL,
            resolution TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_discipline_cases_class ON discipline_cases(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exeat_applications(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            departure_date TEXT NOT NULL,
            return_date TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            status TEXT NOT NULL,
            decided_by TEXT,
            decision_note TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exeat_applications_class ON exeat_applications(class_id)",
        [],
    )?;

    Ok(())
}

fn ensure_result_sets_snapshot(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "result_sets", "snapshot_json")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE result_sets ADD COLUMN snapshot_json TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
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

/// UTC timestamp in the format stored by every `updated_at` column.
pub fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
