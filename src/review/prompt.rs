//! Prompt templates and rendering.
//!
//! Templates use Tera syntax. Four variables are available:
//!
//! - `rawDiff`: the unified diff as text
//! - `files`: the changed files as a JSON array string
//! - `statistics`: diff statistics as a JSON object string
//! - `taskMeta`: task metadata as a JSON object string

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::error::ReviewError;

use super::types::CodeContext;

/// Category of the templates used for code review.
pub const CODE_REVIEW_CATEGORY: &str = "code-review";

/// Template used when no template file is configured.
pub const DEFAULT_TEMPLATE: &str = r#"You are a senior software engineer performing a code review.

Review the change described in the user message. Focus on security
vulnerabilities, correctness bugs, performance problems, maintainability and
adherence to best practices. Ignore purely cosmetic formatting unless it hides
a real problem.

Task metadata: {{ taskMeta }}
Diff statistics: {{ statistics }}
Changed files: {{ files }}

Respond with a single JSON object and nothing else, in this shape:

{"issues": [
  {
    "severity": "CRITICAL | HIGH | MEDIUM | LOW | INFO",
    "category": "SECURITY | PERFORMANCE | MAINTAINABILITY | CORRECTNESS | STYLE | BEST_PRACTICES",
    "filePath": "path/to/file",
    "line": 42,
    "message": "what is wrong",
    "suggestion": "how to fix it"
  }
]}

Return {"issues": []} when the change has no problems worth reporting.
"#;

/// A stored prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub category: String,
    pub content: String,
    pub enabled: bool,
}

impl PromptTemplate {
    /// Creates an enabled template.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            content: content.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Renders the template against a code context.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::Render` for template syntax or evaluation errors.
    pub fn render(&self, context: &CodeContext) -> Result<String, ReviewError> {
        let to_json = |value: serde_json::Result<String>| {
            value.map_err(|e| ReviewError::Context(format!("failed to serialize context: {}", e)))
        };

        let mut vars = Context::new();
        vars.insert("rawDiff", &context.raw_diff);
        vars.insert("files", &to_json(serde_json::to_string(&context.files))?);
        vars.insert(
            "statistics",
            &to_json(serde_json::to_string(&context.statistics))?,
        );
        vars.insert("taskMeta", &to_json(serde_json::to_string(&context.task_meta))?);

        Ok(Tera::one_off(&self.content, &vars, false)?)
    }
}

/// Lookup of prompt templates by category.
#[async_trait]
pub trait PromptTemplateSource: Send + Sync {
    /// Enabled templates of `category`, in preference order.
    async fn find_enabled(&self, category: &str) -> Result<Vec<PromptTemplate>, ReviewError>;
}

/// In-memory template list.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptSource {
    templates: Vec<PromptTemplate>,
}

impl StaticPromptSource {
    pub fn new(templates: Vec<PromptTemplate>) -> Self {
        Self { templates }
    }

    /// A source holding only the built-in code review template.
    pub fn with_default() -> Self {
        Self::new(vec![PromptTemplate::new(
            "default",
            CODE_REVIEW_CATEGORY,
            DEFAULT_TEMPLATE,
        )])
    }

    /// A source holding one code review template read from `path`.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::TemplateSource` if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self, ReviewError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReviewError::TemplateSource(format!("{}: {}", path.display(), e))
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(vec![PromptTemplate::new(
            name,
            CODE_REVIEW_CATEGORY,
            content,
        )]))
    }
}

#[async_trait]
impl PromptTemplateSource for StaticPromptSource {
    async fn find_enabled(&self, category: &str) -> Result<Vec<PromptTemplate>, ReviewError> {
        Ok(self
            .templates
            .iter()
            .filter(|t| t.enabled && t.category == category)
            .cloned()
            .collect())
    }
}
