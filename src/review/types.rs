//! Review inputs and outputs.
//!
//! `CodeContext` is what a provider analyzes; `ReviewResult` is what it
//! returns. Provider responses use camelCase JSON for issues, so the issue
//! types serialize that way.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a review finding, scored CRITICAL(5) down to INFO(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IssueSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl IssueSeverity {
    pub fn score(&self) -> u8 {
        match self {
            IssueSeverity::Critical => 5,
            IssueSeverity::High => 4,
            IssueSeverity::Medium => 3,
            IssueSeverity::Low => 2,
            IssueSeverity::Info => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Critical => "CRITICAL",
            IssueSeverity::High => "HIGH",
            IssueSeverity::Medium => "MEDIUM",
            IssueSeverity::Low => "LOW",
            IssueSeverity::Info => "INFO",
        }
    }
}

impl FromStr for IssueSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(IssueSeverity::Critical),
            "HIGH" => Ok(IssueSeverity::High),
            "MEDIUM" => Ok(IssueSeverity::Medium),
            "LOW" => Ok(IssueSeverity::Low),
            "INFO" => Ok(IssueSeverity::Info),
            other => Err(format!("unknown issue severity '{}'", other)),
        }
    }
}

impl TryFrom<String> for IssueSeverity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IssueSeverity> for String {
    fn from(value: IssueSeverity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a review finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IssueCategory {
    Security,
    Performance,
    Maintainability,
    Correctness,
    Style,
    BestPractices,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Security => "SECURITY",
            IssueCategory::Performance => "PERFORMANCE",
            IssueCategory::Maintainability => "MAINTAINABILITY",
            IssueCategory::Correctness => "CORRECTNESS",
            IssueCategory::Style => "STYLE",
            IssueCategory::BestPractices => "BEST_PRACTICES",
        }
    }
}

impl FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "SECURITY" => Ok(IssueCategory::Security),
            "PERFORMANCE" => Ok(IssueCategory::Performance),
            "MAINTAINABILITY" => Ok(IssueCategory::Maintainability),
            "CORRECTNESS" => Ok(IssueCategory::Correctness),
            "STYLE" => Ok(IssueCategory::Style),
            "BEST_PRACTICES" => Ok(IssueCategory::BestPractices),
            other => Err(format!("unknown issue category '{}'", other)),
        }
    }
}

impl TryFrom<String> for IssueCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IssueCategory> for String {
    fn from(value: IssueCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Provenance of a successful review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetadata {
    pub provider_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration_ms: u64,
    /// Fallback transitions that happened before this result was produced.
    #[serde(default)]
    pub degradation_events: Vec<String>,
}

/// Outcome of a review, produced by a provider or by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub success: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub metadata: Option<ReviewMetadata>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ReviewResult {
    /// A successful review with its findings.
    pub fn success(issues: Vec<ReviewIssue>, metadata: ReviewMetadata) -> Self {
        Self {
            success: true,
            issues,
            metadata: Some(metadata),
            error_message: None,
        }
    }

    /// A failed review carrying only an error message.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            issues: Vec::new(),
            metadata: None,
            error_message: Some(error_message.into()),
        }
    }

    /// Appends degradation events to the metadata, creating it if absent.
    pub fn with_degradation_events(mut self, events: Vec<String>) -> Self {
        if events.is_empty() {
            return self;
        }
        self.metadata
            .get_or_insert_with(ReviewMetadata::default)
            .degradation_events
            .extend(events);
        self
    }

    /// Degradation events recorded on this result, if any.
    pub fn degradation_events(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.degradation_events.as_slice())
            .unwrap_or(&[])
    }

    /// Highest severity among the findings.
    pub fn max_severity(&self) -> Option<IssueSeverity> {
        self.issues
            .iter()
            .map(|i| i.severity)
            .max_by_key(|s| s.score())
    }
}

/// A changed file in the diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub change_type: String,
    pub language: String,
}

/// Aggregate line counts for a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStatistics {
    pub total_files_changed: u32,
    pub total_lines_added: u32,
    pub total_lines_deleted: u32,
}

/// Task facts surfaced to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub pr_title: Option<String>,
    pub pr_description: Option<String>,
    pub author: Option<String>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub task_type: Option<String>,
}

/// Everything a provider needs to analyze a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeContext {
    pub raw_diff: String,
    pub files: Vec<FileInfo>,
    /// File path to content, kept sorted so rendering is deterministic.
    pub file_contents: BTreeMap<String, String>,
    pub statistics: DiffStatistics,
    pub task_meta: TaskMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_parses_provider_json() {
        let json = r#"{
            "severity": "high",
            "category": "best_practices",
            "filePath": "src/lib.rs",
            "line": 12,
            "message": "Unchecked index",
            "suggestion": "Use get()"
        }"#;
        let issue: ReviewIssue = serde_json::from_str(json).expect("issue should parse");
        assert_eq!(issue.severity, IssueSeverity::High);
        assert_eq!(issue.category, IssueCategory::BestPractices);
        assert_eq!(issue.file_path.as_deref(), Some("src/lib.rs"));
        assert_eq!(issue.line, Some(12));
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let json = r#"{"severity": "BLOCKER", "category": "STYLE", "message": "x"}"#;
        assert!(serde_json::from_str::<ReviewIssue>(json).is_err());
    }

    #[test]
    fn test_failed_result_has_no_metadata() {
        let result = ReviewResult::failed("boom");
        assert!(!result.success);
        assert!(result.issues.is_empty());
        assert!(result.metadata.is_none());
        assert!(result.degradation_events().is_empty());
        assert_eq!(result.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_degradation_events_merge_into_metadata() {
        let metadata = ReviewMetadata {
            provider_id: "anthropic".into(),
            model: "claude".into(),
            ..Default::default()
        };
        let result = ReviewResult::success(Vec::new(), metadata)
            .with_degradation_events(vec!["Primary provider 'openai' failed: x".into()]);
        assert_eq!(result.degradation_events().len(), 1);
        assert_eq!(
            result.metadata.as_ref().map(|m| m.provider_id.as_str()),
            Some("anthropic")
        );
    }

    #[test]
    fn test_max_severity() {
        let issue = |severity| ReviewIssue {
            severity,
            category: IssueCategory::Correctness,
            file_path: None,
            line: None,
            message: "m".into(),
            suggestion: None,
        };
        let result = ReviewResult::success(
            vec![issue(IssueSeverity::Low), issue(IssueSeverity::Critical)],
            ReviewMetadata::default(),
        );
        assert_eq!(result.max_severity(), Some(IssueSeverity::Critical));
    }
}
