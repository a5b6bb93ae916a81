//! Anthropic messages API provider.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ProviderError;
use crate::llm::provider::AiProvider;
use crate::llm::registry::ProviderSettings;
use crate::review::types::{CodeContext, ReviewMetadata, ReviewResult};

use super::{build_user_message, parse_issues_content, send_with_retry};

const MESSAGES_PATH: &str = "/v1/messages";

/// Provider for the Anthropic messages API.
///
/// The rendered prompt travels in the top-level `system` field; the only
/// message is the user turn describing the change.
pub struct AnthropicProvider {
    client: Client,
    settings: ProviderSettings,
}

impl AnthropicProvider {
    /// Creates the provider. The request timeout comes from `settings`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(mut settings: ProviderSettings) -> Result<Self, ProviderError> {
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn parse_response(&self, body: &str, started: Instant) -> ReviewResult {
        let duration_ms = started.elapsed().as_millis() as u64;

        let envelope: MessagesResponse = match serde_json::from_str(body) {
            Ok(envelope) => envelope,
            Err(e) => return parse_failure(e),
        };
        let Some(text) = envelope.content.into_iter().find_map(|block| block.text) else {
            return parse_failure("response has no text content");
        };
        let issues = match parse_issues_content(&text) {
            Ok(issues) => issues,
            Err(e) => return parse_failure(e),
        };

        let usage = envelope.usage.unwrap_or_default();
        info!(
            provider = %self.settings.id,
            model = %self.settings.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            duration_ms,
            issues = issues.len(),
            "Review completed"
        );

        ReviewResult::success(
            issues,
            ReviewMetadata {
                provider_id: self.settings.id.clone(),
                model: self.settings.model.clone(),
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                duration_ms,
                degradation_events: Vec::new(),
            },
        )
    }
}

fn parse_failure(reason: impl std::fmt::Display) -> ReviewResult {
    error!(error = %reason, "Failed to parse Anthropic API response");
    ReviewResult::failed(format!("Failed to parse Anthropic API response: {}", reason))
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    async fn analyze(
        &self,
        context: &CodeContext,
        rendered_prompt: &str,
    ) -> Result<ReviewResult, ProviderError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "provider '{}' has no API key",
                    self.settings.id
                ))
            })?;
        let api_version = self
            .settings
            .api_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "provider '{}' has no API version",
                    self.settings.id
                ))
            })?;

        let started = Instant::now();
        let user_message = build_user_message(context);
        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: rendered_prompt,
            messages: vec![UserMessage {
                role: "user",
                content: &user_message,
            }],
        };

        let url = format!("{}{}", self.settings.base_url, MESSAGES_PATH);
        let body = send_with_retry("Anthropic", &self.settings.retry, || {
            self.client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", api_version)
                .json(&request)
        })
        .await?;

        Ok(self.parse_response(&body, started))
    }

    fn is_available(&self) -> bool {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        has(&self.settings.api_key) && has(&self.settings.api_version)
    }

    fn provider_id(&self) -> &str {
        &self.settings.id
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: Vec<UserMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
