//! AI provider implementations.
//!
//! Both providers share the HTTP retry loop and the user message layout
//! defined here; they differ only in request shape, auth headers and where
//! the model output sits in the response envelope.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;

use std::time::Duration;

use reqwest::RequestBuilder;
use tracing::{error, warn};

use crate::error::ProviderError;
use crate::review::types::{CodeContext, ReviewIssue};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Retry settings for transient HTTP failures (429 and 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_base: Duration,
}

impl Default for HttpRetry {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl HttpRetry {
    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Sends a request, retrying rate limits and server errors.
///
/// `build` is called once per attempt. Returns the body of the first 2xx
/// response. Non-2xx statuses are mapped by [`status_error`]; errors that
/// [`ProviderError::is_transient`] accepts are retried with doubling delay
/// until `retry.max_retries` is used up.
///
/// Transport errors are not retried: timeouts map to `Timeout`, the rest to
/// `RequestFailed`.
pub(crate) async fn send_with_retry<F>(
    label: &str,
    retry: &HttpRetry,
    build: F,
) -> Result<String, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let response = build().send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(format!("{} API request timed out", label))
            } else {
                ProviderError::RequestFailed(format!("{} API request failed: {}", label, e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ProviderError::RequestFailed(format!("{} API response unreadable: {}", label, e))
        })?;

        if (200..300).contains(&status) {
            return Ok(body);
        }

        let err = status_error(label, status, truncate_body(&body));
        if err.is_transient() && attempt < retry.max_retries {
            attempt += 1;
            let delay = retry.delay_for(attempt);
            warn!(
                provider = label,
                status,
                attempt,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Transient API failure, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        error!(provider = label, status, attempts = attempt + 1, error = %err, "API call failed");
        return Err(err);
    }
}

/// Maps a non-2xx status to a provider error.
///
/// - 400, 422: `InvalidRequest`
/// - 401: `Authentication`
/// - 408: `Timeout`
/// - 429: `RateLimited`
/// - anything else, 403, 404 and 5xx included: `Api`
fn status_error(label: &str, status: u16, body: String) -> ProviderError {
    match status {
        400 | 422 => ProviderError::InvalidRequest(format!("{} API ({}): {}", label, status, body)),
        401 => ProviderError::Authentication(format!(
            "{} API rejected credentials (401): {}",
            label, body
        )),
        408 => ProviderError::Timeout(format!("{} API (408): {}", label, body)),
        429 => ProviderError::RateLimited(format!("{} API: {}", label, body)),
        code => ProviderError::Api {
            code,
            message: body,
        },
    }
}

/// Renders the user turn describing the change under review.
///
/// Sections appear in a fixed order and are omitted when they have nothing
/// to show. File contents are emitted sorted by path.
pub fn build_user_message(context: &CodeContext) -> String {
    let mut out = String::new();
    let meta = &context.task_meta;

    out.push_str("## Task Info\n");
    let lines = [
        ("PR Title", &meta.pr_title),
        ("PR Description", &meta.pr_description),
        ("Author", &meta.author),
        ("Branch", &meta.branch),
    ];
    for (label, value) in lines {
        if let Some(value) = value {
            out.push_str(&format!("{}: {}\n", label, value));
        }
    }
    out.push('\n');

    let stats = &context.statistics;
    out.push_str(&format!(
        "## Statistics\nFiles changed: {}\nLines added: {}\nLines deleted: {}\n\n",
        stats.total_files_changed, stats.total_lines_added, stats.total_lines_deleted
    ));

    if !context.files.is_empty() {
        out.push_str("## Changed Files\n");
        for file in &context.files {
            out.push_str(&format!(
                "- {} ({}, {})\n",
                file.path, file.change_type, file.language
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!("## Diff\n```\n{}\n```\n\n", context.raw_diff));

    if !context.file_contents.is_empty() {
        out.push_str("## File Contents\n");
        for (path, content) in &context.file_contents {
            out.push_str(&format!("### {}\n```\n{}\n```\n\n", path, content));
        }
    }

    out
}

/// Extracts the `issues` array from model output.
///
/// Accepts output wrapped in a Markdown code fence. A missing or null
/// `issues` field yields an empty list.
pub fn parse_issues_content(content: &str) -> Result<Vec<ReviewIssue>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(content))?;
    match value.get("issues") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(issues) => serde_json::from_value(issues.clone()),
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push_str("...");
    out
}
