//! Error types for review-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Task state persistence
//! - AI provider calls
//! - Provider registry construction
//! - Review orchestration
//!
//! Queue, configuration and worker pool errors live next to their modules.

use thiserror::Error;

use crate::scheduler::task::{TaskId, TaskStatus};

/// Errors that can occur in a task state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task already exists for project {project_id} at commit {commit_hash}")]
    Duplicate { project_id: i64, commit_hash: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt task record: {0}")]
    Corrupt(String),
}

/// Errors raised by an AI provider.
///
/// Display strings carry stable markers (`rate limit exceeded`,
/// `request timed out`, `HTTP <code>` ...) that the worker's failure
/// classifier relies on after they are folded into a review error message.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("API error (HTTP {code}): {message}")]
    Api { code: u16, message: String },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether the provider-internal retry loop should try again.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) => true,
            ProviderError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur while building the provider registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("Unknown provider kind '{0}'")]
    UnknownKind(String),

    #[error("Failed to construct provider '{id}': {source}")]
    Construction {
        id: String,
        #[source]
        source: ProviderError,
    },
}

/// Errors surfaced by the review orchestrator.
///
/// Only `TemplateNotFound` escapes `ReviewOrchestrator::review`; the other
/// variants are folded into a failed `ReviewResult`.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("No enabled prompt template found for category '{0}'")]
    TemplateNotFound(String),

    #[error("Context assembly failed: {0}")]
    Context(String),

    #[error("Prompt rendering failed: {0}")]
    Render(#[from] tera::Error),

    #[error("Prompt template source failed: {0}")]
    TemplateSource(String),

    #[error("Provider '{0}' is not registered")]
    ProviderNotRegistered(String),
}
