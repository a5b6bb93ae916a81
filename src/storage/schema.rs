//! Database schema constants.
//!
//! SQL schema for the SQLite task store. Statements are idempotent and are
//! applied one by one by the migration runner.

/// SQL schema for creating the review_task table.
pub const CREATE_REVIEW_TASK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS review_task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    repo_url TEXT NOT NULL,
    branch TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    pr_number INTEGER,
    pr_title TEXT,
    pr_description TEXT,
    author TEXT,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE(project_id, commit_hash)
)
"#;

pub const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_review_task_status ON review_task(status, created_at)";

pub const CREATE_PROJECT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_review_task_project ON review_task(project_id)";

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_REVIEW_TASK_TABLE,
        CREATE_STATUS_INDEX,
        CREATE_PROJECT_INDEX,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const REVIEW_TASK: &str = "review_task";
    pub const MIGRATIONS: &str = "_migrations";
}
