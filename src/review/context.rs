//! Code context assembly.

use async_trait::async_trait;

use crate::error::ReviewError;
use crate::scheduler::task::Task;

use super::types::{CodeContext, TaskMetadata};

/// Builds the [`CodeContext`] a provider reviews for a task.
#[async_trait]
pub trait ContextAssembler: Send + Sync {
    async fn assemble_context(&self, task: &Task) -> Result<CodeContext, ReviewError>;
}

/// Assembles a context from the task record alone.
///
/// No repository access: the diff, file list and file contents stay empty and
/// only the task metadata is filled in. Useful when diffs are fetched by a
/// separate service, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataContextAssembler;

impl MetadataContextAssembler {
    pub fn new() -> Self {
        Self
    }
}

/// Task facts surfaced to the model.
pub fn task_metadata(task: &Task) -> TaskMetadata {
    TaskMetadata {
        pr_title: task.pr_title.clone(),
        pr_description: task.pr_description.clone(),
        author: task.author.clone(),
        branch: Some(task.branch.clone()),
        commit_hash: Some(task.commit_hash.clone()),
        task_type: Some(task.task_type.as_str().to_string()),
    }
}

#[async_trait]
impl ContextAssembler for MetadataContextAssembler {
    async fn assemble_context(&self, task: &Task) -> Result<CodeContext, ReviewError> {
        Ok(CodeContext {
            task_meta: task_metadata(task),
            ..Default::default()
        })
    }
}
