use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "questd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quests(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            label TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            priority_score REAL NOT NULL DEFAULT 0,
            is_committed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT,
            UNIQUE(year, quarter, label)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quests_scope ON quests(year, quarter)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quest_judgments(
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            judgments TEXT NOT NULL DEFAULT '{}',
            is_finalized INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(year, quarter)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_rules(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            week_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            display_order REAL NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Early workspaces stored rules without a completion flag.
    ensure_weekly_rules_completed(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_rules_scope
         ON weekly_rules(year, quarter, week_number, display_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS milestones(
            id TEXT PRIMARY KEY,
            quest_id TEXT NOT NULL,
            title TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            display_order REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(quest_id) REFERENCES quests(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_milestones_quest ON milestones(quest_id, display_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            milestone_id TEXT NOT NULL,
            title TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            display_order REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(milestone_id) REFERENCES milestones(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_milestone ON tasks(milestone_id, display_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subtasks(
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            title TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            display_order REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(task_id) REFERENCES tasks(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id, display_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            display_order REAL NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_order ON students(display_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_student_months(
            student_id TEXT NOT NULL,
            month TEXT NOT NULL,
            day_codes TEXT NOT NULL,
            PRIMARY KEY(student_id, month),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student_months_month
         ON attendance_student_months(month)",
        [],
    )?;

    Ok(conn)
}

fn ensure_weekly_rules_completed(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "weekly_rules", "completed")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE weekly_rules ADD COLUMN completed INTEGER NOT NULL DEFAULT 0",
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
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
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
