//! Review task definitions for the scheduler.
//!
//! This module defines the durable record that flows through the review
//! pipeline and the enums that drive scheduling decisions:
//!
//! - `Task`: a review task persisted by a `TaskStateStore`
//! - `NewTask`: the input used to create a task from a change event
//! - `TaskType`, `TaskStatus`, `TaskPriority`: lifecycle and ordering
//! - `FailureType`: classification consumed by the retry policy
//!
//! State transitions are implemented here as pure methods so that every store
//! backend enforces the same rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identifier of a review task.
pub type TaskId = i64;

/// Default maximum number of task-level retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Kind of change event that produced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Push,
    PullRequest,
    MergeRequest,
}

impl TaskType {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Push => "PUSH",
            TaskType::PullRequest => "PULL_REQUEST",
            TaskType::MergeRequest => "MERGE_REQUEST",
        }
    }

    /// Priority assigned to tasks of this type at creation.
    ///
    /// Pull and merge requests block a human reviewer, pushes do not.
    pub fn default_priority(&self) -> TaskPriority {
        match self {
            TaskType::PullRequest | TaskType::MergeRequest => TaskPriority::High,
            TaskType::Push => TaskPriority::Normal,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PUSH" => Ok(TaskType::Push),
            "PULL_REQUEST" | "PR" => Ok(TaskType::PullRequest),
            "MERGE_REQUEST" | "MR" => Ok(TaskType::MergeRequest),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Returns true for COMPLETED and FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Scheduling priority. Only two tiers exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    High,
    Normal,
}

impl TaskPriority {
    /// Numeric weight, higher is served first.
    pub fn weight(&self) -> u32 {
        match self {
            TaskPriority::High => 100,
            TaskPriority::Normal => 50,
        }
    }

    /// Rank used in queue scores: `100 - weight`, lower is served first.
    pub fn rank(&self) -> u64 {
        u64::from(100 - self.weight())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "HIGH",
            TaskPriority::Normal => "NORMAL",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(TaskPriority::High),
            "NORMAL" => Ok(TaskPriority::Normal),
            other => Err(format!("unknown task priority '{}'", other)),
        }
    }
}

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    RateLimit,
    NetworkError,
    Timeout,
    ValidationError,
    AuthenticationError,
    Unknown,
}

impl FailureType {
    /// Whether a task failing this way should be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureType::RateLimit
            | FailureType::NetworkError
            | FailureType::Timeout
            | FailureType::Unknown => true,
            FailureType::ValidationError | FailureType::AuthenticationError => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::RateLimit => "RATE_LIMIT",
            FailureType::NetworkError => "NETWORK_ERROR",
            FailureType::Timeout => "TIMEOUT",
            FailureType::ValidationError => "VALIDATION_ERROR",
            FailureType::AuthenticationError => "AUTHENTICATION_ERROR",
            FailureType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a task from a repository change event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub project_id: i64,
    pub task_type: TaskType,
    pub repo_url: String,
    pub branch: String,
    pub commit_hash: String,
    #[serde(default)]
    pub pr_number: Option<i64>,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl NewTask {
    /// Creates a new task input with the required fields.
    ///
    /// # Arguments
    ///
    /// * `project_id` - Owning project
    /// * `task_type` - Kind of change event
    /// * `repo_url` - Repository URL
    /// * `branch` - Branch the change was made on
    /// * `commit_hash` - Head commit of the change
    pub fn new(
        project_id: i64,
        task_type: TaskType,
        repo_url: impl Into<String>,
        branch: impl Into<String>,
        commit_hash: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            task_type,
            repo_url: repo_url.into(),
            branch: branch.into(),
            commit_hash: commit_hash.into(),
            pr_number: None,
            pr_title: None,
            pr_description: None,
            author: None,
        }
    }

    /// Sets the pull/merge request number and title.
    pub fn with_pull_request(mut self, number: i64, title: impl Into<String>) -> Self {
        self.pr_number = Some(number);
        self.pr_title = Some(title.into());
        self
    }

    /// Sets the pull/merge request description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.pr_description = Some(description.into());
        self
    }

    /// Sets the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// A review task as persisted by a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub project_id: i64,
    pub task_type: TaskType,
    pub repo_url: String,
    pub branch: String,
    pub commit_hash: String,
    pub pr_number: Option<i64>,
    pub pr_title: Option<String>,
    pub pr_description: Option<String>,
    pub author: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a fresh PENDING task from its creation input.
    ///
    /// Priority is derived from the task type and never changes afterwards.
    /// `max_retries` is raised to 1 so the first failure never overshoots it.
    pub fn from_new(id: TaskId, new: NewTask, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id: new.project_id,
            priority: new.task_type.default_priority(),
            task_type: new.task_type,
            repo_url: new.repo_url,
            branch: new.branch,
            commit_hash: new.commit_hash,
            pr_number: new.pr_number,
            pr_title: new.pr_title,
            pr_description: new.pr_description,
            author: new.author,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: max_retries.max(1),
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Whether another task-level attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// PENDING -> RUNNING. `started_at` is set on the first start only.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Pending, TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Running, TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Records a retryable failure of a RUNNING task.
    ///
    /// Increments `retry_count`; the task goes back to PENDING while retries
    /// remain, otherwise it becomes FAILED.
    pub fn record_failure(
        &mut self,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let target = if self.retry_count + 1 >= self.max_retries {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        };
        self.expect_status(TaskStatus::Running, target)?;

        self.retry_count += 1;
        self.error_message = Some(error_message.into());
        self.status = target;
        if target == TaskStatus::Failed {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> FAILED without consuming a retry.
    pub fn fail_permanently(
        &mut self,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Running, TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn expect_status(&self, expected: TaskStatus, to: TaskStatus) -> Result<(), StoreError> {
        if self.status != expected {
            return Err(StoreError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_task(retry_count: u32, max_retries: u32) -> Task {
        let now = Utc::now();
        let mut task = Task::from_new(
            7,
            NewTask::new(1, TaskType::Push, "https://git.local/repo", "main", "abc123"),
            max_retries,
            now,
        );
        task.retry_count = retry_count;
        task.start(now).expect("pending task should start");
        task
    }

    #[test]
    fn test_priority_derived_from_task_type() {
        assert_eq!(TaskType::Push.default_priority(), TaskPriority::Normal);
        assert_eq!(TaskType::PullRequest.default_priority(), TaskPriority::High);
        assert_eq!(TaskType::MergeRequest.default_priority(), TaskPriority::High);
        assert_eq!(TaskPriority::High.rank(), 0);
        assert_eq!(TaskPriority::Normal.rank(), 50);
    }

    #[test]
    fn test_failure_type_retryable_table() {
        assert!(FailureType::RateLimit.is_retryable());
        assert!(FailureType::NetworkError.is_retryable());
        assert!(FailureType::Timeout.is_retryable());
        assert!(FailureType::Unknown.is_retryable());
        assert!(!FailureType::ValidationError.is_retryable());
        assert!(!FailureType::AuthenticationError.is_retryable());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("pr".parse::<TaskType>(), Ok(TaskType::PullRequest));
        assert_eq!("merge-request".parse::<TaskType>(), Ok(TaskType::MergeRequest));
        assert_eq!("running".parse::<TaskStatus>(), Ok(TaskStatus::Running));
        assert_eq!("HIGH".parse::<TaskPriority>(), Ok(TaskPriority::High));
        assert!("later".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_zero_max_retries_keeps_count_within_bound() {
        let mut task = running_task(0, 0);
        assert_eq!(task.max_retries, 1);

        task.record_failure("rate limit exceeded", Utc::now())
            .expect("running task should record failure");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert!(task.retry_count <= task.max_retries);
    }

    #[test]
    fn test_started_at_set_once() {
        let mut task = running_task(0, 3);
        let first_start = task.started_at;
        assert!(first_start.is_some());

        task.record_failure("rate limit exceeded", Utc::now())
            .expect("running task should record failure");
        assert_eq!(task.status, TaskStatus::Pending);

        task.start(Utc::now() + chrono::Duration::seconds(5))
            .expect("pending task should restart");
        assert_eq!(task.started_at, first_start);
    }

    #[test]
    fn test_record_failure_requeues_until_exhausted() {
        let mut task = running_task(0, 3);
        task.record_failure("boom", Utc::now()).expect("failure recorded");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.completed_at.is_none());

        let mut task = running_task(2, 3);
        task.record_failure("boom", Utc::now()).expect("failure recorded");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert!(task.completed_at.is_some());
        assert!(!task.can_retry());
    }

    #[test]
    fn test_fail_permanently_keeps_retry_count() {
        let mut task = running_task(1, 3);
        task.fail_permanently("invalid request", Utc::now())
            .expect("running task should fail");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("invalid request"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let now = Utc::now();
        let mut task = Task::from_new(
            1,
            NewTask::new(1, TaskType::Push, "r", "main", "c"),
            3,
            now,
        );
        assert!(matches!(
            task.complete(now),
            Err(StoreError::InvalidTransition { from: TaskStatus::Pending, .. })
        ));

        task.start(now).expect("start");
        task.complete(now).expect("complete");
        assert!(task.start(now).is_err());
        assert!(task.fail_permanently("late", now).is_err());
        assert_eq!(task.status, TaskStatus::Completed);
    }
}
