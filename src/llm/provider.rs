//! The AI provider contract.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::review::types::{CodeContext, ReviewResult};

/// A model backend that turns a code context into review findings.
///
/// Implementations own their transport concerns: per-request timeout,
/// internal retry of rate limits and server errors, and translation of HTTP
/// status codes into [`ProviderError`] variants. A response that arrives but
/// cannot be understood is returned as `Ok(ReviewResult::failed(..))`, not as
/// an error; only transport and API failures are errors.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Reviews the change described by `context` using `rendered_prompt` as
    /// the system instructions.
    async fn analyze(
        &self,
        context: &CodeContext,
        rendered_prompt: &str,
    ) -> Result<ReviewResult, ProviderError>;

    /// Whether the provider is configured well enough to be called.
    fn is_available(&self) -> bool;

    /// Stable identifier used for selection and in degradation events.
    fn provider_id(&self) -> &str;
}
