//! OpenAI chat completions provider.
//!
//! Works with any endpoint that speaks the `/v1/chat/completions` protocol
//! and honours `response_format: json_object`.

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

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Provider for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatibleProvider {
    client: Client,
    settings: ProviderSettings,
}

impl OpenAiCompatibleProvider {
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

    fn endpoint(&self) -> String {
        format!("{}{}", self.settings.base_url, CHAT_COMPLETIONS_PATH)
    }

    fn parse_response(&self, body: &str, started: Instant) -> ReviewResult {
        let duration_ms = started.elapsed().as_millis() as u64;

        let envelope: ChatResponse = match serde_json::from_str(body) {
            Ok(envelope) => envelope,
            Err(e) => return parse_failure(e),
        };
        let Some(content) = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
        else {
            return parse_failure("response has no message content");
        };
        let issues = match parse_issues_content(&content) {
            Ok(issues) => issues,
            Err(e) => return parse_failure(e),
        };

        let usage = envelope.usage.unwrap_or_default();
        info!(
            provider = %self.settings.id,
            model = %self.settings.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            duration_ms,
            issues = issues.len(),
            "Review completed"
        );

        ReviewResult::success(
            issues,
            ReviewMetadata {
                provider_id: self.settings.id.clone(),
                model: self.settings.model.clone(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                duration_ms,
                degradation_events: Vec::new(),
            },
        )
    }
}

fn parse_failure(reason: impl std::fmt::Display) -> ReviewResult {
    error!(error = %reason, "Failed to parse OpenAI API response");
    ReviewResult::failed(format!("Failed to parse OpenAI API response: {}", reason))
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
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

        let started = Instant::now();
        let user_message = build_user_message(context);
        let request = ChatRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: rendered_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
        };

        let url = self.endpoint();
        let body = send_with_retry("OpenAI", &self.settings.retry, || {
            self.client.post(&url).bearer_auth(api_key).json(&request)
        })
        .await?;

        Ok(self.parse_response(&body, started))
    }

    fn is_available(&self) -> bool {
        self.settings
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    fn provider_id(&self) -> &str {
        &self.settings.id
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
