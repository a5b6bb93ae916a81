//! Provider fallback behavior of the review orchestrator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use review_forge::error::{ProviderError, ReviewError};
use review_forge::llm::{AiProvider, ProviderRegistry};
use review_forge::review::{
    CodeContext, ContextAssembler, DiffStatistics, IssueCategory, IssueSeverity,
    MetadataContextAssembler, PromptTemplate, ReviewIssue, ReviewMetadata, ReviewOrchestrator,
    ReviewResult, StaticPromptSource, CODE_REVIEW_CATEGORY,
};
use review_forge::scheduler::{NewTask, Task, TaskType};

type Outcome = Box<dyn Fn(&str) -> Result<ReviewResult, ProviderError> + Send + Sync>;

/// Provider that records every call and answers from a closure.
struct RecordingProvider {
    id: String,
    available: bool,
    outcome: Outcome,
    calls: Mutex<Vec<(CodeContext, String)>>,
}

impl RecordingProvider {
    fn new<F>(id: &str, outcome: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<ReviewResult, ProviderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: id.to_string(),
            available: true,
            outcome: Box::new(outcome),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn unavailable(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            available: false,
            outcome: Box::new(succeed),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(CodeContext, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl AiProvider for RecordingProvider {
    async fn analyze(
        &self,
        context: &CodeContext,
        rendered_prompt: &str,
    ) -> Result<ReviewResult, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((context.clone(), rendered_prompt.to_string()));
        (self.outcome)(&self.id)
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn succeed(id: &str) -> Result<ReviewResult, ProviderError> {
    Ok(ReviewResult::success(
        vec![ReviewIssue {
            severity: IssueSeverity::High,
            category: IssueCategory::Security,
            file_path: Some("src/auth.rs".to_string()),
            line: Some(12),
            message: "Token compared with ==".to_string(),
            suggestion: Some("Use a constant-time comparison".to_string()),
        }],
        ReviewMetadata {
            provider_id: id.to_string(),
            model: "stub".to_string(),
            prompt_tokens: 120,
            completion_tokens: 30,
            ..Default::default()
        },
    ))
}

/// Assembler that adds a fixed diff to the task metadata.
struct DiffAssembler;

#[async_trait]
impl ContextAssembler for DiffAssembler {
    async fn assemble_context(&self, task: &Task) -> Result<CodeContext, ReviewError> {
        let mut context = MetadataContextAssembler::new().assemble_context(task).await?;
        context.raw_diff = "--- a/src/auth.rs\n+++ b/src/auth.rs\n-a\n+b".to_string();
        context.statistics = DiffStatistics {
            total_files_changed: 1,
            total_lines_added: 1,
            total_lines_deleted: 1,
        };
        Ok(context)
    }
}

fn task() -> Task {
    Task::from_new(
        11,
        NewTask::new(3, TaskType::PullRequest, "https://git.local/app.git", "feature", "c0de")
            .with_pull_request(5, "Harden auth"),
        3,
        Utc::now(),
    )
}

fn orchestrator(providers: &[Arc<RecordingProvider>], fallback: &str) -> ReviewOrchestrator {
    let mut registry = ProviderRegistry::new("openai");
    for provider in providers {
        registry
            .register(Arc::clone(provider) as Arc<dyn AiProvider>)
            .expect("unique ids");
    }
    let templates = StaticPromptSource::new(vec![PromptTemplate::new(
        "review",
        CODE_REVIEW_CATEGORY,
        "Review this diff:\n{{ rawDiff }}",
    )]);
    ReviewOrchestrator::new(
        Arc::new(registry),
        Arc::new(DiffAssembler),
        Arc::new(templates),
        fallback,
    )
}

#[tokio::test]
async fn test_primary_success_skips_fallback() {
    let primary = RecordingProvider::new("openai", succeed);
    let fallback = RecordingProvider::new("anthropic", succeed);
    let orchestrator = orchestrator(&[primary.clone(), fallback.clone()], "anthropic");

    let result = orchestrator.review(&task()).await.expect("result");

    assert!(result.success);
    assert_eq!(result.issues.len(), 1);
    assert!(result.degradation_events().is_empty());
    assert_eq!(primary.calls().len(), 1);
    assert!(fallback.calls().is_empty());
}

#[tokio::test]
async fn test_primary_failed_result_is_returned_as_is() {
    let primary = RecordingProvider::new("openai", |_| {
        Ok(ReviewResult::failed("Failed to parse OpenAI API response: eof"))
    });
    let fallback = RecordingProvider::new("anthropic", succeed);
    let orchestrator = orchestrator(&[primary.clone(), fallback.clone()], "anthropic");

    let result = orchestrator.review(&task()).await.expect("result");

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Failed to parse OpenAI API response: eof")
    );
    assert!(fallback.calls().is_empty());
}

#[tokio::test]
async fn test_fallback_receives_same_context_and_prompt() {
    let primary = RecordingProvider::new("openai", |_| {
        Err(ProviderError::RateLimited("quota".to_string()))
    });
    let fallback = RecordingProvider::new("anthropic", succeed);
    let orchestrator = orchestrator(&[primary.clone(), fallback.clone()], "anthropic");

    let result = orchestrator.review(&task()).await.expect("result");

    assert!(result.success);
    let primary_calls = primary.calls();
    let fallback_calls = fallback.calls();
    assert_eq!(primary_calls.len(), 1);
    assert_eq!(fallback_calls.len(), 1);
    assert_eq!(primary_calls[0], fallback_calls[0]);
    assert!(fallback_calls[0].1.contains("+++ b/src/auth.rs"));
    assert_eq!(
        fallback_calls[0].0.task_meta.pr_title.as_deref(),
        Some("Harden auth")
    );

    assert_eq!(
        result.degradation_events(),
        ["Primary provider 'openai' failed: rate limit exceeded: quota".to_string()]
    );
    let metadata = result.metadata.expect("metadata");
    assert_eq!(metadata.provider_id, "anthropic");
}

#[tokio::test]
async fn test_both_providers_failing_names_both() {
    let primary = RecordingProvider::new("openai", |_| {
        Err(ProviderError::Timeout("30s elapsed".to_string()))
    });
    let fallback = RecordingProvider::new("anthropic", |_| {
        Err(ProviderError::Api {
            code: 529,
            message: "overloaded".to_string(),
        })
    });
    let orchestrator = orchestrator(&[primary, fallback], "anthropic");

    let result = orchestrator.review(&task()).await.expect("result");

    assert!(!result.success);
    assert!(result.metadata.is_none());
    assert_eq!(
        result.error_message.as_deref(),
        Some(
            "All AI providers failed. Degradation chain: [Primary provider 'openai' failed: \
             request timed out: 30s elapsed, Fallback provider 'anthropic' failed: \
             API error (HTTP 529): overloaded]"
        )
    );
}

#[tokio::test]
async fn test_unregistered_fallback_is_skipped() {
    let primary = RecordingProvider::new("openai", |_| {
        Err(ProviderError::RequestFailed("connection reset".to_string()))
    });
    let orchestrator = orchestrator(&[primary], "mistral");

    let result = orchestrator.review(&task()).await.expect("result");

    let message = result.error_message.expect("message");
    assert!(message.starts_with("All AI providers failed."));
    assert!(message.contains(
        "Fallback skipped: provider 'mistral' is same as primary or unavailable"
    ));
}

#[tokio::test]
async fn test_unavailable_fallback_is_not_called() {
    let primary = RecordingProvider::new("openai", |_| {
        Err(ProviderError::Authentication("bad key".to_string()))
    });
    let fallback = RecordingProvider::unavailable("anthropic");
    let orchestrator = orchestrator(&[primary, fallback.clone()], "anthropic");

    let result = orchestrator.review(&task()).await.expect("result");

    assert!(!result.success);
    assert!(fallback.calls().is_empty());
}

#[tokio::test]
async fn test_missing_template_propagates() {
    let registry = ProviderRegistry::new("openai")
        .with_provider(RecordingProvider::new("openai", succeed) as Arc<dyn AiProvider>)
        .expect("registry");
    let orchestrator = ReviewOrchestrator::new(
        Arc::new(registry),
        Arc::new(MetadataContextAssembler::new()),
        Arc::new(StaticPromptSource::new(vec![PromptTemplate::new(
            "off",
            CODE_REVIEW_CATEGORY,
            "x",
        )
        .disabled()])),
        "anthropic",
    );

    let result = orchestrator.review(&task()).await;
    assert!(matches!(result, Err(ReviewError::TemplateNotFound(_))));
}
