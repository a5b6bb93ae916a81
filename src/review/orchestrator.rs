//! Review orchestration with provider fallback.
//!
//! # Degradation levels
//!
//! 0. The registry's default provider. Whatever it returns, including a
//!    failed result, is final.
//! 1. On a provider error, the fallback provider, unless it is the primary
//!    itself, unregistered or unavailable.
//! 2. Both unusable: a failed result listing every degradation event.
//!
//! Each step appends a human-readable event; a successful fallback result
//! carries those events in its metadata.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::ReviewError;
use crate::llm::{AiProvider, ProviderRegistry};
use crate::metrics::MetricsCollector;
use crate::scheduler::task::Task;

use super::context::ContextAssembler;
use super::prompt::{PromptTemplateSource, CODE_REVIEW_CATEGORY};
use super::types::{CodeContext, ReviewResult};

/// Runs a complete review for a task.
pub struct ReviewOrchestrator {
    registry: Arc<ProviderRegistry>,
    assembler: Arc<dyn ContextAssembler>,
    templates: Arc<dyn PromptTemplateSource>,
    fallback_id: String,
    metrics: MetricsCollector,
}

impl ReviewOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Arguments
    ///
    /// * `registry` - Providers; its default provider is the primary
    /// * `assembler` - Builds the code context for a task
    /// * `templates` - Source of the `code-review` prompt template
    /// * `fallback_id` - Provider tried when the primary errors
    pub fn new(
        registry: Arc<ProviderRegistry>,
        assembler: Arc<dyn ContextAssembler>,
        templates: Arc<dyn PromptTemplateSource>,
        fallback_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            assembler,
            templates,
            fallback_id: fallback_id.into(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn fallback_id(&self) -> &str {
        &self.fallback_id
    }

    /// Reviews a task.
    ///
    /// # Errors
    ///
    /// Only `ReviewError::TemplateNotFound` is returned as an error. Every
    /// other failure, including all providers failing, is reported through
    /// a failed `ReviewResult`.
    pub async fn review(&self, task: &Task) -> Result<ReviewResult, ReviewError> {
        let started = Instant::now();
        let outcome = self.run(task).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok((result, label)) => {
                self.metrics.record_review(label, elapsed);
                Ok(result)
            }
            Err(ReviewError::TemplateNotFound(category)) => {
                error!(task_id = task.id, category = %category, "No enabled prompt template");
                self.metrics.record_review("failed", elapsed);
                Err(ReviewError::TemplateNotFound(category))
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "Review orchestration failed");
                self.metrics.record_review("failed", elapsed);
                Ok(ReviewResult::failed(format!(
                    "Review orchestration failed: {}",
                    e
                )))
            }
        }
    }

    async fn run(&self, task: &Task) -> Result<(ReviewResult, &'static str), ReviewError> {
        let context = self.assembler.assemble_context(task).await?;
        let prompt = self.load_and_render_prompt(&context).await?;
        self.execute_with_fallback(&context, &prompt).await
    }

    async fn load_and_render_prompt(&self, context: &CodeContext) -> Result<String, ReviewError> {
        let template = self
            .templates
            .find_enabled(CODE_REVIEW_CATEGORY)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ReviewError::TemplateNotFound(CODE_REVIEW_CATEGORY.to_string()))?;

        info!(template = %template.name, "Using prompt template");
        template.render(context)
    }

    async fn execute_with_fallback(
        &self,
        context: &CodeContext,
        prompt: &str,
    ) -> Result<(ReviewResult, &'static str), ReviewError> {
        let primary = self.registry.default_provider().ok_or_else(|| {
            ReviewError::ProviderNotRegistered(self.registry.default_id().to_string())
        })?;
        let primary_id = primary.provider_id().to_string();
        let mut events = Vec::new();

        info!(provider = %primary_id, "Attempting review with primary provider");
        match primary.analyze(context, prompt).await {
            Ok(result) => {
                self.record_call(&primary_id, &result);
                let label = if result.success { "primary" } else { "failed" };
                return Ok((result, label));
            }
            Err(e) => {
                warn!(provider = %primary_id, error = %e, "Primary provider failed");
                self.metrics.record_provider_call(&primary_id, "error", 0, 0);
                self.metrics.record_degradation("primary_failed");
                events.push(format!("Primary provider '{}' failed: {}", primary_id, e));
            }
        }

        match self.resolve_fallback(&primary_id) {
            Some(fallback) => {
                info!(
                    from = %primary_id,
                    to = %self.fallback_id,
                    "Attempting review with fallback provider"
                );
                match fallback.analyze(context, prompt).await {
                    Ok(result) => {
                        self.record_call(&self.fallback_id, &result);
                        if result.success {
                            return Ok((result.with_degradation_events(events), "fallback"));
                        }
                        return Ok((result, "failed"));
                    }
                    Err(e) => {
                        error!(provider = %self.fallback_id, error = %e, "Fallback provider also failed");
                        self.metrics
                            .record_provider_call(&self.fallback_id, "error", 0, 0);
                        self.metrics.record_degradation("fallback_failed");
                        events.push(format!(
                            "Fallback provider '{}' failed: {}",
                            self.fallback_id, e
                        ));
                    }
                }
            }
            None => {
                info!(
                    fallback = %self.fallback_id,
                    primary = %primary_id,
                    "Skipping fallback provider"
                );
                self.metrics.record_degradation("fallback_skipped");
                events.push(format!(
                    "Fallback skipped: provider '{}' is same as primary or unavailable",
                    self.fallback_id
                ));
            }
        }

        let chain = events.join(", ");
        error!(chain = %chain, "All AI providers failed");
        Ok((
            ReviewResult::failed(format!(
                "All AI providers failed. Degradation chain: [{}]",
                chain
            )),
            "failed",
        ))
    }

    fn resolve_fallback(&self, primary_id: &str) -> Option<Arc<dyn AiProvider>> {
        if self.fallback_id == primary_id {
            return None;
        }
        match self.registry.get(&self.fallback_id) {
            Some(provider) if provider.is_available() => Some(provider),
            Some(_) => None,
            None => {
                warn!(fallback = %self.fallback_id, "Fallback provider not registered");
                None
            }
        }
    }

    fn record_call(&self, provider_id: &str, result: &ReviewResult) {
        let status = if result.success { "success" } else { "failed" };
        let (prompt_tokens, completion_tokens) = result
            .metadata
            .as_ref()
            .map(|m| (m.prompt_tokens, m.completion_tokens))
            .unwrap_or((0, 0));
        self.metrics
            .record_provider_call(provider_id, status, prompt_tokens, completion_tokens);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::error::ProviderError;
    use crate::review::context::MetadataContextAssembler;
    use crate::review::prompt::{PromptTemplate, StaticPromptSource};
    use crate::review::types::ReviewMetadata;
    use crate::scheduler::task::{NewTask, TaskType};

    struct StubProvider {
        id: &'static str,
        available: bool,
        outcome: fn(&str) -> Result<ReviewResult, ProviderError>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(id: &'static str, outcome: fn(&str) -> Result<ReviewResult, ProviderError>) -> Self {
            Self {
                id,
                available: true,
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AiProvider for StubProvider {
        async fn analyze(
            &self,
            _context: &CodeContext,
            _rendered_prompt: &str,
        ) -> Result<ReviewResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(self.id)
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn provider_id(&self) -> &str {
            self.id
        }
    }

    fn ok(id: &str) -> Result<ReviewResult, ProviderError> {
        Ok(ReviewResult::success(
            Vec::new(),
            ReviewMetadata {
                provider_id: id.to_string(),
                ..Default::default()
            },
        ))
    }

    fn timeout(_: &str) -> Result<ReviewResult, ProviderError> {
        Err(ProviderError::Timeout("deadline".to_string()))
    }

    fn task() -> Task {
        Task::from_new(
            1,
            NewTask::new(1, TaskType::Push, "repo", "main", "c0ffee"),
            3,
            Utc::now(),
        )
    }

    fn orchestrator(
        providers: Vec<Arc<StubProvider>>,
        fallback: &str,
        templates: StaticPromptSource,
    ) -> ReviewOrchestrator {
        let mut registry = ProviderRegistry::new("openai");
        for provider in providers {
            registry.register(provider).expect("unique ids");
        }
        ReviewOrchestrator::new(
            Arc::new(registry),
            Arc::new(MetadataContextAssembler::new()),
            Arc::new(templates),
            fallback,
        )
    }

    #[tokio::test]
    async fn test_missing_template_is_error() {
        let primary = Arc::new(StubProvider::new("openai", ok));
        let orchestrator = orchestrator(
            vec![Arc::clone(&primary)],
            "anthropic",
            StaticPromptSource::default(),
        );

        let result = orchestrator.review(&task()).await;
        assert!(matches!(result, Err(ReviewError::TemplateNotFound(c)) if c == "code-review"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_render_error_becomes_failed_result() {
        let templates = StaticPromptSource::new(vec![PromptTemplate::new(
            "broken",
            CODE_REVIEW_CATEGORY,
            "{% if %}",
        )]);
        let orchestrator = orchestrator(
            vec![Arc::new(StubProvider::new("openai", ok))],
            "anthropic",
            templates,
        );

        let result = orchestrator.review(&task()).await.expect("not propagated");
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Review orchestration failed:")));
    }

    #[tokio::test]
    async fn test_unregistered_default_becomes_failed_result() {
        let orchestrator = orchestrator(
            vec![Arc::new(StubProvider::new("anthropic", ok))],
            "anthropic",
            StaticPromptSource::with_default(),
        );

        let result = orchestrator.review(&task()).await.expect("not propagated");
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("'openai' is not registered")));
    }

    #[tokio::test]
    async fn test_fallback_same_as_primary_is_skipped() {
        let primary = Arc::new(StubProvider::new("openai", timeout));
        let orchestrator = orchestrator(
            vec![Arc::clone(&primary)],
            "openai",
            StaticPromptSource::with_default(),
        );

        let result = orchestrator.review(&task()).await.expect("result");
        assert!(!result.success);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.error_message.as_deref(),
            Some(
                "All AI providers failed. Degradation chain: [Primary provider 'openai' failed: \
                 request timed out: deadline, Fallback skipped: provider 'openai' is same as \
                 primary or unavailable]"
            )
        );
    }

    #[tokio::test]
    async fn test_unavailable_fallback_is_skipped() {
        let mut fallback = StubProvider::new("anthropic", ok);
        fallback.available = false;
        let fallback = Arc::new(fallback);
        let orchestrator = orchestrator(
            vec![Arc::new(StubProvider::new("openai", timeout)), Arc::clone(&fallback)],
            "anthropic",
            StaticPromptSource::with_default(),
        );

        let result = orchestrator.review(&task()).await.expect("result");
        assert!(!result.success);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("Fallback skipped: provider 'anthropic'")));
    }

    #[tokio::test]
    async fn test_failed_fallback_result_keeps_no_events() {
        fn unparsable(_: &str) -> Result<ReviewResult, ProviderError> {
            Ok(ReviewResult::failed("Failed to parse Anthropic API response: eof"))
        }
        let orchestrator = orchestrator(
            vec![
                Arc::new(StubProvider::new("openai", timeout)),
                Arc::new(StubProvider::new("anthropic", unparsable)),
            ],
            "anthropic",
            StaticPromptSource::with_default(),
        );

        let result = orchestrator.review(&task()).await.expect("result");
        assert!(!result.success);
        assert!(result.degradation_events().is_empty());
        assert_eq!(
            result.error_message.as_deref(),
            Some("Failed to parse Anthropic API response: eof")
        );
    }
}
