//! SQLite task store built on sqlx.
//!
//! Transitions are read-modify-write inside a transaction; the UPDATE is
//! guarded on the status that was read so a concurrent writer cannot be
//! silently overwritten.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::scheduler::task::{
    NewTask, Task, TaskId, TaskPriority, TaskStatus, TaskType,
};

use super::migrations::MigrationRunner;
use super::TaskStateStore;

const SELECT_COLUMNS: &str = r#"
    SELECT id, project_id, task_type, repo_url, branch, commit_hash,
           pr_number, pr_title, pr_description, author, status, priority,
           retry_count, max_retries, error_message,
           created_at, started_at, completed_at, updated_at
    FROM review_task
"#;

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Connects to the database, creating the file if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite URL (e.g. "sqlite://review-forge.db" or "sqlite::memory:")
    ///
    /// In-memory databases are private to a connection, so the pool is
    /// limited to a single connection for them.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the schema.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }

    async fn update<F>(&self, id: TaskId, apply: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task) -> Result<(), StoreError> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let mut task = row_to_task(&row)?;
        let previous_status = task.status;

        apply(&mut task)?;

        let result = sqlx::query(
            r#"
            UPDATE review_task
            SET status = ?, retry_count = ?, error_message = ?,
                started_at = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(i64::from(task.retry_count))
        .bind(&task.error_message)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .bind(id)
        .bind(previous_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                task_id: id,
                from: previous_status,
                to: task.status,
            });
        }

        tx.commit().await?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStateStore for SqliteTaskStore {
    async fn create(&self, new_task: NewTask, max_retries: u32) -> Result<Task, StoreError> {
        let now = Utc::now();
        // Id is assigned by the database; 0 is replaced below.
        let mut task = Task::from_new(0, new_task, max_retries, now);

        let result = sqlx::query(
            r#"
            INSERT INTO review_task (
                project_id, task_type, repo_url, branch, commit_hash,
                pr_number, pr_title, pr_description, author, status, priority,
                retry_count, max_retries, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.project_id)
        .bind(task.task_type.as_str())
        .bind(&task.repo_url)
        .bind(&task.branch)
        .bind(&task.commit_hash)
        .bind(task.pr_number)
        .bind(&task.pr_title)
        .bind(&task.pr_description)
        .bind(&task.author)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                task.id = done.last_insert_rowid();
                Ok(task)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    project_id: task.project_id,
                    commit_hash: task.commit_hash,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn find_by_commit(
        &self,
        project_id: i64,
        commit_hash: &str,
    ) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE project_id = ? AND commit_hash = ?",
            SELECT_COLUMNS
        ))
        .bind(project_id)
        .bind(commit_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn find_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ? ORDER BY created_at, id LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn mark_started(&self, id: TaskId) -> Result<Task, StoreError> {
        self.update(id, |task| task.start(Utc::now())).await
    }

    async fn mark_completed(&self, id: TaskId) -> Result<Task, StoreError> {
        self.update(id, |task| task.complete(Utc::now())).await
    }

    async fn mark_failed(&self, id: TaskId, error_message: &str) -> Result<Task, StoreError> {
        self.update(id, |task| task.record_failure(error_message, Utc::now()))
            .await
    }

    async fn mark_failed_permanently(
        &self,
        id: TaskId,
        error_message: &str,
    ) -> Result<Task, StoreError> {
        self.update(id, |task| task.fail_permanently(error_message, Utc::now()))
            .await
    }
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| StoreError::Corrupt(format!("{}: {}", column, e)))
}

fn count_column(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{}: {} out of range", column, raw)))
}

fn row_to_task(row: &SqliteRow) -> Result<Task, StoreError> {
    Ok(Task {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        task_type: parse_column::<TaskType>(row, "task_type")?,
        repo_url: row.try_get("repo_url")?,
        branch: row.try_get("branch")?,
        commit_hash: row.try_get("commit_hash")?,
        pr_number: row.try_get("pr_number")?,
        pr_title: row.try_get("pr_title")?,
        pr_description: row.try_get("pr_description")?,
        author: row.try_get("author")?,
        status: parse_column::<TaskStatus>(row, "status")?,
        priority: parse_column::<TaskPriority>(row, "priority")?,
        retry_count: count_column(row, "retry_count")?,
        max_retries: count_column(row, "max_retries")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}
