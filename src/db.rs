use crate::config::Config;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path, cfg: &Config) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    // Another client holding the write lock must not hang a request forever.
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            school_id INTEGER,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_school ON users(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            flash_kind TEXT,
            flash_message TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permission_requests(
            id INTEGER PRIMARY KEY,
            school_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            reason TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            status TEXT NOT NULL,
            reviewed_by INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permission_requests_school ON permission_requests(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permission_requests_owner ON permission_requests(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id INTEGER PRIMARY KEY,
            school_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            total_marks REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_owner ON activities(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id INTEGER PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            marks_obtained REAL,
            feedback TEXT,
            status TEXT NOT NULL,
            graded_by INTEGER,
            submitted_at TEXT NOT NULL,
            graded_at TEXT,
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(activity_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_activity ON submissions(activity_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_bank(
            id INTEGER PRIMARY KEY,
            school_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            question_text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            marks REAL NOT NULL,
            status TEXT NOT NULL,
            reviewer_id INTEGER,
            review_note TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_bank_school_status ON question_bank(school_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_papers(
            id INTEGER PRIMARY KEY,
            school_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            subject TEXT NOT NULL,
            class_name TEXT NOT NULL,
            exam_date TEXT,
            duration_minutes INTEGER NOT NULL,
            total_marks REAL NOT NULL,
            instructions TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_papers_owner ON exam_papers(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_paper_questions(
            paper_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            marks REAL NOT NULL,
            PRIMARY KEY(paper_id, question_id),
            FOREIGN KEY(paper_id) REFERENCES exam_papers(id),
            FOREIGN KEY(question_id) REFERENCES question_bank(id)
        )",
        [],
    )?;

    Ok(())
}
