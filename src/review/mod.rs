//! Code review orchestration.
//!
//! A review turns a [`Task`](crate::scheduler::task::Task) into a
//! [`ReviewResult`]: the [`ContextAssembler`] builds the code context, a
//! `code-review` template from the [`PromptTemplateSource`] is rendered into
//! the system prompt, and [`ReviewOrchestrator`] runs the provider chain.

pub mod context;
pub mod orchestrator;
pub mod prompt;
pub mod types;

pub use context::{ContextAssembler, MetadataContextAssembler};
pub use orchestrator::ReviewOrchestrator;
pub use prompt::{
    PromptTemplate, PromptTemplateSource, StaticPromptSource, CODE_REVIEW_CATEGORY,
    DEFAULT_TEMPLATE,
};
pub use types::{
    CodeContext, DiffStatistics, FileInfo, IssueCategory, IssueSeverity, ReviewIssue,
    ReviewMetadata, ReviewResult, TaskMetadata,
};
