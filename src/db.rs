use crate::calc::GradingConfig;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "results.sqlite3";
pub const GRADING_SETTINGS_KEY: &str = "setup.grading";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term INTEGER NOT NULL,
            education_level TEXT NOT NULL,
            raw_scores TEXT NOT NULL,
            ca_total REAL NOT NULL,
            grand_total REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            is_passed INTEGER NOT NULL,
            class_position INTEGER,
            status TEXT NOT NULL,
            teacher_remark TEXT,
            entered_by TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            published_by TEXT,
            published_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE(student_id, subject_id, session, term)
        )",
        [],
    )?;
    ensure_results_version(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_class_subject
         ON results(class_id, subject_id, session, term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student_term
         ON results(student_id, session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_transitions(
            id TEXT PRIMARY KEY,
            result_id TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            at TEXT NOT NULL,
            FOREIGN KEY(result_id) REFERENCES results(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_transitions_result
         ON result_transitions(result_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term INTEGER NOT NULL,
            status TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            published_by TEXT,
            published_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE(student_id, session, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_term_reports_class
         ON term_reports(class_id, session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before optimistic locking shipped have no version column.
fn ensure_results_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "results", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE results ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
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
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

/// Grading policy for this workspace: stored overrides merged over defaults.
/// Existing derived totals are snapshots; changing this never rewrites them.
pub fn load_grading_config(conn: &Connection) -> anyhow::Result<GradingConfig> {
    let defaults = GradingConfig::default();
    let Some(stored) = settings_get_json(conn, GRADING_SETTINGS_KEY)? else {
        return Ok(defaults);
    };

    let mut config = defaults;
    if let Some(v) = stored.get("passThreshold").and_then(|v| v.as_f64()) {
        config.pass_threshold = v;
    }
    if let Some(v) = stored.get("nurseryMaxMarks").and_then(|v| v.as_f64()) {
        config.nursery_max_marks = v;
    }
    if let Some(v) = stored.get("gradeBreakpoints") {
        if !v.is_null() {
            config.grade_breakpoints = serde_json::from_value(v.clone())?;
        }
    }
    Ok(config)
}
